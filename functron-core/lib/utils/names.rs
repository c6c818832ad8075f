//! Temporary image names.

use functron_utils::{IMAGE_NAME_PREFIX, TEMPORARY_TAG_SUFFIX_LEN, TEMPORARY_TAG_VERSION};
use rand::{rngs::StdRng, Rng, SeedableRng};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Generates random tags for temporary invocation images.
///
/// Seeding makes the sequence of names reproducible, which tests rely on.
#[derive(Debug, Clone)]
pub struct NameGenerator {
    rng: StdRng,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl NameGenerator {
    /// A generator seeded from the operating system.
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// A generator with a fixed seed.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// `n` random lowercase letters.
    pub fn random_letters(&mut self, n: usize) -> String {
        (0..n)
            .map(|_| LETTERS[self.rng.random_range(0..LETTERS.len())] as char)
            .collect()
    }

    /// A tag of the form `functron-<base>-<5 letters>:1.0`.
    pub fn temporary_name(&mut self, base: &str) -> String {
        format!(
            "{}{}-{}:{}",
            IMAGE_NAME_PREFIX,
            base,
            self.random_letters(TEMPORARY_TAG_SUFFIX_LEN),
            TEMPORARY_TAG_VERSION
        )
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The container name used for a running temporary image, its tag with `:` replaced.
pub fn container_name_for(tag: &str) -> String {
    tag.replace(':', "-")
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for NameGenerator {
    fn default() -> Self {
        Self::from_entropy()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
