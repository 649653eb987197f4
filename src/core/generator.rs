use crate::storage::{Storage, TicketInsert};
use rand::Rng;

// Lowercase hex, the same shape as the original md5-substring codes. 16^10
// possible codes at the default length of 10 keeps collisions rare even for
// pools in the millions.
const CODE_ALPHABET: &[u8] = b"0123456789abcdef";

/// Generate a random lowercase-hex code of the specified length
pub fn random_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    /// Too many consecutive collisions for a single slot: the configured
    /// code length cannot accommodate the requested pool size.
    #[error("code space exhausted: {retries} consecutive collisions at code length {length}; increase the code length or lower the pool size")]
    CodeSpaceExhausted { length: usize, retries: u32 },

    #[error("storage failure during pool generation")]
    Storage(#[source] anyhow::Error),
}

/// Summary of one `generate_pool` run.
#[derive(Debug, Clone)]
pub struct PoolReport {
    pub requested: u64,
    pub existing: u64,
    pub generated: u64,
    pub collisions: u64,
}

/// Fills the ticket pool with unique codes, retrying collided candidates.
///
/// Generation is idempotent: it tops the pool up to the target size, so
/// re-running with the same or a larger target never duplicates tickets.
/// It is meant to run as a single exclusive initialization step, not
/// concurrently with other generators.
pub struct PoolGenerator<S: Storage> {
    storage: S,
    code_length: usize,
    max_code_retries: u32,
}

impl<S: Storage> PoolGenerator<S> {
    pub fn new(storage: S, code_length: usize, max_code_retries: u32) -> Self {
        Self {
            storage,
            code_length,
            max_code_retries,
        }
    }

    /// Top the pool up to `size` tickets.
    ///
    /// A collision is expected and handled by regenerating the candidate;
    /// more than `max_code_retries` collisions in a row for one slot aborts
    /// with [`GenerateError::CodeSpaceExhausted`]. Any other storage failure
    /// aborts generation; already-inserted tickets stay valid and a rerun
    /// simply continues the top-up.
    pub async fn generate_pool(&self, size: u64) -> Result<PoolReport, GenerateError> {
        let existing = self
            .storage
            .ticket_count()
            .await
            .map_err(GenerateError::Storage)?;

        if existing >= size {
            tracing::info!(
                "Ticket pool already has {} tickets (target {}), nothing to generate",
                existing,
                size
            );
            return Ok(PoolReport {
                requested: size,
                existing,
                generated: 0,
                collisions: 0,
            });
        }

        let mut collisions = 0u64;
        for _ in existing..size {
            let mut attempts = 0u32;
            loop {
                let code = random_code(self.code_length);
                match self
                    .storage
                    .insert_ticket(&code)
                    .await
                    .map_err(GenerateError::Storage)?
                {
                    TicketInsert::Inserted(_) => break,
                    TicketInsert::DuplicateCode => {
                        collisions += 1;
                        attempts += 1;
                        if attempts >= self.max_code_retries {
                            return Err(GenerateError::CodeSpaceExhausted {
                                length: self.code_length,
                                retries: attempts,
                            });
                        }
                    }
                }
            }
        }

        let generated = size - existing;
        tracing::info!(
            "Generated {} tickets ({} collisions retried), pool now at {}",
            generated,
            collisions,
            size
        );

        Ok(PoolReport {
            requested: size,
            existing,
            generated,
            collisions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_code_creates_correct_length() {
        let code = random_code(10);
        assert_eq!(code.len(), 10);
    }

    #[test]
    fn test_random_code_is_lowercase_hex() {
        let code = random_code(32);
        assert!(code.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    #[test]
    fn test_random_code_different_calls_produce_different_codes() {
        let code1 = random_code(10);
        let code2 = random_code(10);
        // Very unlikely to be equal (probability ~1 in 16^10)
        assert_ne!(code1, code2);
    }
}
