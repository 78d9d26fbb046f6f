//! Run/session identifier generation.

use uuid::Uuid;

/// Generates short, collision-resistant identifiers for mission runs and
/// sessions. A thin wrapper today, kept as its own type so the generation
/// strategy (currently UUIDv4) can change without touching call sites.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdGenerator;

impl IdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn generate_run_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    #[must_use]
    pub fn generate_session_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_unique_ids() {
        let gen = IdGenerator::new();
        let a = gen.generate_run_id();
        let b = gen.generate_run_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }
}
