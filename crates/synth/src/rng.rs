//! Site-seeded pseudo-random source.

/// Replacement seed for the xorshift zero fixed point.
const ZERO_SEED_FALLBACK: u32 = 0x9E37_79B9;

/// FNV-1a hash over the UTF-16 code units of a site id.
pub fn hash_site(site: &str) -> u32 {
    let mut h: u32 = 2_166_136_261;
    for unit in site.encode_utf16() {
        h ^= u32::from(unit);
        h = h.wrapping_add(
            (h << 1)
                .wrapping_add(h << 4)
                .wrapping_add(h << 7)
                .wrapping_add(h << 8)
                .wrapping_add(h << 24),
        );
    }
    h
}

/// 32-bit xorshift generator (13/17/5).
#[derive(Debug, Clone)]
pub struct XorShift32 {
    state: u32,
}

impl XorShift32 {
    pub fn new(seed: u32) -> Self {
        let state = if seed == 0 { ZERO_SEED_FALLBACK } else { seed };
        Self { state }
    }

    pub fn for_site(site: &str) -> Self {
        Self::new(hash_site(site))
    }

    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        f64::from(self.next_u32()) / 4_294_967_296.0
    }
}
