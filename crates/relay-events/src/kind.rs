//! Fixed integer tags for the event kinds this node consumes or emits.

/// A peer's public advertisement. Lives in the replaceable range, so a
/// newer advertisement supersedes an older one from the same pubkey.
pub const PEER_INFO_KIND: u32 = 13194;

/// Encrypted settlement request, addressed via a `p` tag.
pub const REQUEST_KIND: u32 = 23194;

/// Encrypted settlement response, addressed via a `p` tag and optionally
/// correlated to the request event via an `e` tag.
pub const RESPONSE_KIND: u32 = 23195;

/// Follow list; its `p` tags expand the discovery candidate set.
pub const FOLLOW_LIST_KIND: u32 = 3;

pub fn is_replaceable(kind: u32) -> bool {
    kind == 0 || kind == FOLLOW_LIST_KIND || (10_000..20_000).contains(&kind)
}

pub fn is_ephemeral(kind: u32) -> bool {
    (20_000..30_000).contains(&kind)
}

pub fn is_parameterized_replaceable(kind: u32) -> bool {
    (30_000..40_000).contains(&kind)
}
