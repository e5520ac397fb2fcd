//! Id generation
//!
//! 모든 엔티티 id 는 `<prefix>-<8 hex>` 형식이다 (`ws-1f2e3d4c`, `proj-...`).

use uuid::Uuid;

/// Generate a prefixed short id
pub fn prefixed_id(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_id_shape() {
        let id = prefixed_id("ws");
        assert!(id.starts_with("ws-"));
        assert_eq!(id.len(), 3 + 8);
        assert_ne!(prefixed_id("ws"), prefixed_id("ws"));
    }
}
