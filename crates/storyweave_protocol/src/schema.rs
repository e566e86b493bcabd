//! Fixed project schema constants.
//!
//! The sync core treats entity records as opaque trees, but the set of
//! collections is known at compile time and the diff engine iterates them
//! in this exact order (tests assert on it).

/// Current schema version of the project state tree.
pub const SCHEMA_VERSION: i64 = 3;

/// Top-level key holding the schema version scalar.
pub const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Top-level key holding the shared custom field-title configuration.
pub const CUSTOM_TITLES_KEY: &str = "custom_titles";

/// Entity collections, in diff emission order.
pub const COLLECTIONS: [&str; 6] = [
    "characters",
    "factions",
    "locations",
    "stories",
    "hooks",
    "goals",
];

/// Entity fields edited as free-form text.
///
/// In CRDT mode these map to a sequence CRDT so concurrent edits to the
/// same field converge character-by-character; everything else is
/// last-writer-wins.
pub const TEXT_FIELDS: [&str; 6] = [
    "name",
    "title",
    "label",
    "description",
    "story_public",
    "story_private",
];

/// Returns true if `key` names one of the fixed entity collections.
pub fn is_collection(key: &str) -> bool {
    COLLECTIONS.contains(&key)
}

/// Returns true if `field` is edited as free-form text.
pub fn is_text_field(field: &str) -> bool {
    TEXT_FIELDS.contains(&field)
}
