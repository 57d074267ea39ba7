pub mod random;

use random::RandomSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Random,
    Periodic,
}

/// One overwrite pass: either random data or a short byte pattern tiled
/// across the whole extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassSpec {
    pub kind: PassKind,
    pub pattern: &'static [u8],
}

impl PassSpec {
    const fn random() -> Self {
        Self {
            kind: PassKind::Random,
            pattern: &[],
        }
    }

    const fn periodic(pattern: &'static [u8]) -> Self {
        Self {
            kind: PassKind::Periodic,
            pattern,
        }
    }

    pub fn name(&self) -> String {
        match self.kind {
            PassKind::Random => "random".to_string(),
            PassKind::Periodic => self
                .pattern
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// Gutmann's schedule: four random passes on each side of the 27
/// RLL/MFM encoding patterns.
pub const PASS_TABLE: [PassSpec; 35] = [
    PassSpec::random(),
    PassSpec::random(),
    PassSpec::random(),
    PassSpec::random(),
    PassSpec::periodic(&[0x55]),
    PassSpec::periodic(&[0xaa]),
    PassSpec::periodic(&[0x92, 0x49, 0x24]),
    PassSpec::periodic(&[0x49, 0x24, 0x92]),
    PassSpec::periodic(&[0x24, 0x92, 0x49]),
    PassSpec::periodic(&[0x00]),
    PassSpec::periodic(&[0x11]),
    PassSpec::periodic(&[0x22]),
    PassSpec::periodic(&[0x33]),
    PassSpec::periodic(&[0x44]),
    PassSpec::periodic(&[0x55]),
    PassSpec::periodic(&[0x66]),
    PassSpec::periodic(&[0x77]),
    PassSpec::periodic(&[0x88]),
    PassSpec::periodic(&[0x99]),
    PassSpec::periodic(&[0xaa]),
    PassSpec::periodic(&[0xbb]),
    PassSpec::periodic(&[0xcc]),
    PassSpec::periodic(&[0xdd]),
    PassSpec::periodic(&[0xee]),
    PassSpec::periodic(&[0xff]),
    PassSpec::periodic(&[0x92, 0x49, 0x24]),
    PassSpec::periodic(&[0x49, 0x24, 0x92]),
    PassSpec::periodic(&[0x24, 0x92, 0x49]),
    PassSpec::periodic(&[0x6d, 0xb6, 0xdb]),
    PassSpec::periodic(&[0xb6, 0xdb, 0x6d]),
    PassSpec::periodic(&[0xdb, 0x6d, 0xb6]),
    PassSpec::random(),
    PassSpec::random(),
    PassSpec::random(),
    PassSpec::random(),
];

pub const SECURE_PASSES: usize = PASS_TABLE.len();

/// Order in which passes are applied to one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassPlan {
    order: Vec<usize>,
    quick: bool,
}

impl PassPlan {
    /// `count` random passes; the pattern table is never consulted.
    pub fn quick(count: usize) -> Self {
        Self {
            order: (0..count).collect(),
            quick: true,
        }
    }

    /// All table entries in a random order.
    ///
    /// Each step reduces a 32-bit draw modulo the remaining slot count. The
    /// resulting bias is tiny for a 35-slot table and is kept for
    /// compatibility; `secure_unbiased` rejects out-of-range draws instead.
    pub fn secure(rng: &mut dyn RandomSource) -> Self {
        let mut order: Vec<usize> = (0..SECURE_PASSES).collect();
        for i in 0..SECURE_PASSES - 2 {
            let a = rng.next_u32() as usize % (SECURE_PASSES - i);
            order.swap(i, i + a);
        }
        Self {
            order,
            quick: false,
        }
    }

    pub fn secure_unbiased(rng: &mut dyn RandomSource) -> Self {
        let mut order: Vec<usize> = (0..SECURE_PASSES).collect();
        for i in 0..SECURE_PASSES - 1 {
            let a = uniform_below(rng, (SECURE_PASSES - i) as u32) as usize;
            order.swap(i, i + a);
        }
        Self {
            order,
            quick: false,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn is_quick(&self) -> bool {
        self.quick
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Pass spec applied at plan position `step`.
    pub fn spec(&self, step: usize) -> PassSpec {
        if self.quick {
            PassSpec::random()
        } else {
            PASS_TABLE[self.order[step]]
        }
    }
}

/// Builds the plan for one target. A fresh permutation is drawn on every
/// call so pass order differs from file to file.
pub fn build_plan(
    quick: bool,
    quick_count: usize,
    unbiased: bool,
    rng: &mut dyn RandomSource,
) -> PassPlan {
    match (quick, unbiased) {
        (true, _) => PassPlan::quick(quick_count),
        (false, false) => PassPlan::secure(rng),
        (false, true) => PassPlan::secure_unbiased(rng),
    }
}

fn uniform_below(rng: &mut dyn RandomSource, bound: u32) -> u32 {
    let zone = u32::MAX - (u32::MAX % bound);
    loop {
        let x = rng.next_u32();
        if x < zone {
            return x % bound;
        }
    }
}

/// Tiles `pattern` across `buffer`, truncating the final repetition.
pub fn fill_pattern(buffer: &mut [u8], pattern: &[u8]) {
    if pattern.is_empty() {
        return;
    }
    for chunk in buffer.chunks_mut(pattern.len()) {
        chunk.copy_from_slice(&pattern[..chunk.len()]);
    }
}

#[cfg(test)]
mod tests {
    use super::random::tests::CountingSource;
    use super::random::{create_random_source, RandomAlgorithm};
    use super::*;

    #[test]
    fn test_table_layout() {
        let random: Vec<usize> = PASS_TABLE
            .iter()
            .enumerate()
            .filter(|(_, p)| p.kind == PassKind::Random)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(random, vec![0, 1, 2, 3, 31, 32, 33, 34]);
        assert!(PASS_TABLE
            .iter()
            .filter(|p| p.kind == PassKind::Periodic)
            .all(|p| p.pattern.len() == 1 || p.pattern.len() == 3));
    }

    #[test]
    fn test_secure_plan_is_a_permutation() {
        let mut rng = create_random_source(RandomAlgorithm::ChaCha20, [3u8; 32]);
        for _ in 0..50 {
            let plan = build_plan(false, 4, false, rng.as_mut());
            let mut seen = plan.order().to_vec();
            seen.sort_unstable();
            assert_eq!(seen, (0..SECURE_PASSES).collect::<Vec<_>>());
            assert!(!plan.is_quick());
        }
    }

    #[test]
    fn test_unbiased_plan_is_a_permutation() {
        let mut rng = CountingSource::new(9);
        let plan = build_plan(false, 4, true, &mut rng);
        let mut seen = plan.order().to_vec();
        seen.sort_unstable();
        assert_eq!(seen, (0..SECURE_PASSES).collect::<Vec<_>>());
    }

    #[test]
    fn test_plans_differ_between_files() {
        let mut rng = create_random_source(RandomAlgorithm::ChaCha20, [5u8; 32]);
        let first = build_plan(false, 4, false, rng.as_mut());
        let second = build_plan(false, 4, false, rng.as_mut());
        assert_ne!(first.order(), second.order());
    }

    #[test]
    fn test_quick_plan_only_random() {
        let mut rng = CountingSource::new(0);
        let plan = build_plan(true, 6, false, &mut rng);
        assert_eq!(plan.len(), 6);
        assert!(plan.is_quick());
        assert!((0..plan.len()).all(|i| plan.spec(i).kind == PassKind::Random));
    }

    #[test]
    fn test_fill_single_byte_pattern() {
        let mut buffer = vec![0u8; 4096];
        fill_pattern(&mut buffer, &[0x55]);
        assert!(buffer.iter().all(|&b| b == 0x55));
    }

    #[test]
    fn test_fill_three_byte_pattern_truncates_last_tile() {
        let mut buffer = vec![0u8; 8];
        fill_pattern(&mut buffer, &[0x92, 0x49, 0x24]);
        assert_eq!(buffer, vec![0x92, 0x49, 0x24, 0x92, 0x49, 0x24, 0x92, 0x49]);
    }

    #[test]
    fn test_pass_names() {
        assert_eq!(PASS_TABLE[0].name(), "random");
        assert_eq!(PASS_TABLE[6].name(), "92 49 24");
    }
}
