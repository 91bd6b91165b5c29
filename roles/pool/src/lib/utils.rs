use rand::Rng;

/// Broadcast to every task when the process is coming down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownMessage {
    ShutdownAll,
}

/// Per-connection identifier used as the subscription id and in log lines.
pub fn connection_id() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_are_unique_and_hex() {
        let a = connection_id();
        let b = connection_id();
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
