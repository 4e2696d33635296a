//! Naming and copy helpers used when materializing resources

use std::collections::BTreeMap;

/// Generate a fresh unique name for a new resource.
///
/// Never derived from the request name.
pub fn generate_unique_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Copy a class string map into a new resource, keeping an absent map absent
pub fn deep_copy_string_map(
    map: Option<&BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    map.map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

/// Copy a class string list into a new resource, keeping an absent list absent
pub fn deep_copy_string_slice(slice: Option<&[String]>) -> Option<Vec<String>> {
    slice.map(|s| s.to_vec())
}
