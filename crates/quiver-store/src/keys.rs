//! Key layout of the name region.

/// Separator between the name and the owner in a name-region key.
pub const NAME_SEPARATOR: char = '_';

/// Name-region key for `(name, owner)`: `<name>_<owner>`.
///
/// Owners are canonical hyphenated UUIDs of fixed width, so the key is
/// unambiguous even when `name` itself contains the separator, and two
/// owners can use the same name without colliding.
pub fn name_key(name: &str, owner: &str) -> Vec<u8> {
    format!("{name}{NAME_SEPARATOR}{owner}").into_bytes()
}
