use rand::rngs::OsRng;
use rand::Rng;

use crate::error::{StoreError, ValidationError};
use crate::store::InventoryTx;

pub const FALLBACK_LENGTH: usize = 8;
const FALLBACK_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Code handed out when the administrator-fed queue has run dry.
pub fn fallback_code() -> String {
    let mut rng = OsRng;
    (0..FALLBACK_LENGTH)
        .map(|_| FALLBACK_ALPHABET[rng.gen_range(0..FALLBACK_ALPHABET.len())] as char)
        .collect()
}

/// Takes the oldest queued code inside `tx`, or synthesizes one.
pub async fn issue(tx: &mut dyn InventoryTx) -> Result<String, StoreError> {
    match tx.pop_password().await? {
        Some(code) => Ok(code),
        None => {
            log::warn!("Password queue is empty, issuing a generated code");
            Ok(fallback_code())
        }
    }
}

pub fn normalize(code: &str) -> Result<&str, ValidationError> {
    let code = code.trim();
    if code.is_empty() {
        Err(ValidationError::PasswordRequired)
    } else {
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InventorySeed, InventoryStore, MemoryInventory};
    use std::collections::HashSet;
    use std::time::Duration;

    #[test]
    fn fallback_codes_use_the_uppercase_alphanumeric_alphabet() {
        for _ in 0..100 {
            let code = fallback_code();
            assert_eq!(code.len(), FALLBACK_LENGTH);
            assert!(code.bytes().all(|b| FALLBACK_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn fallback_codes_vary() {
        let codes: HashSet<String> = (0..20).map(|_| fallback_code()).collect();
        assert!(codes.len() > 1);
    }

    #[test]
    fn blank_codes_are_rejected() {
        assert_eq!(normalize("  "), Err(ValidationError::PasswordRequired));
        assert_eq!(normalize(" 4821 "), Ok("4821"));
    }

    #[actix_web::test]
    async fn issue_prefers_the_queue() {
        let store = MemoryInventory::new(
            InventorySeed {
                passwords: vec!["4821".to_string()],
                ..Default::default()
            },
            Duration::from_secs(1),
        );
        let mut tx = store.begin().await.unwrap();
        assert_eq!(issue(tx.as_mut()).await.unwrap(), "4821");
        let generated = issue(tx.as_mut()).await.unwrap();
        assert_eq!(generated.len(), FALLBACK_LENGTH);
    }
}
