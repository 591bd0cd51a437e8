use rand::Rng;

pub const CODE_LENGTH: usize = 15;

/// Source of candidate referral codes. The ledger retries through this on a
/// collision, so generators need not guarantee uniqueness.
pub trait CodeGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Draws each character independently and uniformly from `a-z`.
pub struct RandomCodeGenerator;

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..CODE_LENGTH)
            .map(|_| rng.gen_range(b'a'..=b'z') as char)
            .collect()
    }
}
