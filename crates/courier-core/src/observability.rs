use serde::{Deserialize, Serialize};

/// Pending-message view served by `GET /message`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStatus {
    #[serde(rename = "MessageCount")]
    pub message_count: usize,
}

impl StoreStatus {
    pub fn of(store: &dyn crate::store::Store) -> Self {
        Self {
            message_count: store.count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_the_wire_field_name() {
        let json = serde_json::to_string(&StoreStatus { message_count: 3 }).unwrap();
        assert_eq!(json, r#"{"MessageCount":3}"#);
    }
}
