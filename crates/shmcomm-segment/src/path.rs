//! Canonical name resolution for named shared-memory segments.
//!
//! A logical name such as `"robot/odom"` is turned into the OS-visible
//! shared-memory object name `"/shm_robot_odom"`: every interior `/` is
//! replaced with `_` and any leading `/` is stripped before the `shm_`
//! prefix is applied. Two calls with the same logical name always produce
//! the same canonical path, on any process, any time.

/// Builds the canonical shared-memory object name for a logical name.
///
/// # Examples
/// ```ignore
/// assert_eq!(canonical_path("odom"), "/shm_odom");
/// assert_eq!(canonical_path("/odom"), "/shm_odom");
/// assert_eq!(canonical_path("robot/odom"), "/shm_robot_odom");
/// ```
pub fn canonical_path(name: &str) -> String {
    let trimmed = name.strip_prefix('/').unwrap_or(name);
    let sanitized = trimmed.replace('/', "_");
    format!("/shm_{sanitized}")
}

/// `true` if `name` would produce a usable canonical path.
///
/// An empty logical name (or one that sanitizes to nothing, e.g. `"/"`)
/// is rejected — it would collide with every other empty name and carries
/// no information for a human inspecting `/dev/shm`.
pub fn is_valid_logical_name(name: &str) -> bool {
    let trimmed = name.strip_prefix('/').unwrap_or(name);
    !trimmed.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_leading_slash() {
        assert_eq!(canonical_path("odom"), "/shm_odom");
        assert_eq!(canonical_path("/odom"), "/shm_odom");
    }

    #[test]
    fn replaces_interior_slashes() {
        assert_eq!(canonical_path("robot/odom"), "/shm_robot_odom");
        assert_eq!(canonical_path("a/b/c"), "/shm_a_b_c");
    }

    #[test]
    fn deterministic() {
        assert_eq!(canonical_path("topic"), canonical_path("topic"));
        assert_eq!(canonical_path("/topic"), canonical_path("topic"));
    }

    #[test]
    fn rejects_empty_name() {
        assert!(!is_valid_logical_name(""));
        assert!(!is_valid_logical_name("/"));
        assert!(is_valid_logical_name("x"));
    }
}
