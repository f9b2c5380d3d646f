//! Seeded noise sources for terrain generation.
//!
//! A string seed is first run through an Alea-style PRNG, whose first draw
//! seeds an OpenSimplex source from the `noise` crate. The same seed string
//! always produces the same noise field on every platform.

use std::{num::NonZeroUsize, sync::Arc};

use lru::LruCache;
use noise::{NoiseFn, OpenSimplex};

/// Number of distinct seeds kept warm by a [`NoiseCache`].
pub const NOISE_CACHE_CAPACITY: usize = 8;

/// Deterministic PRNG producing values in `[0, 1)` from a string seed.
///
/// Port of the Alea generator family: three fractional state words and a
/// carry, mixed by a multiply-with-carry step.
#[derive(Clone, Debug)]
pub struct SeededRng {
    s0: f64,
    s1: f64,
    s2: f64,
    c: f64,
}

/// Applies JavaScript `ToUint32` semantics to a finite double.
fn to_uint32(value: f64) -> f64 {
    value.trunc().rem_euclid(4_294_967_296.0)
}

struct Mash {
    n: f64,
}

impl Mash {
    fn new() -> Self {
        Mash { n: 4_022_871_197.0 }
    }

    fn mash(&mut self, data: &str) -> f64 {
        for unit in data.encode_utf16() {
            self.n += unit as f64;
            let mut h = 0.025_196_032_824_169_38 * self.n;
            self.n = to_uint32(h);
            h -= self.n;
            h *= self.n;
            self.n = to_uint32(h);
            h -= self.n;
            self.n += h * 4_294_967_296.0;
        }
        to_uint32(self.n) * 2.328_306_436_538_696_3e-10
    }
}

impl SeededRng {
    /// Seeds the generator from an arbitrary string. Any string is accepted.
    pub fn new(seed: &str) -> Self {
        let mut mash = Mash::new();
        let mut s0 = mash.mash(" ");
        let mut s1 = mash.mash(" ");
        let mut s2 = mash.mash(" ");

        s0 -= mash.mash(seed);
        if s0 < 0.0 {
            s0 += 1.0;
        }
        s1 -= mash.mash(seed);
        if s1 < 0.0 {
            s1 += 1.0;
        }
        s2 -= mash.mash(seed);
        if s2 < 0.0 {
            s2 += 1.0;
        }

        SeededRng { s0, s1, s2, c: 1.0 }
    }

    /// Next value in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        let t = 2_091_639.0 * self.s0 + self.c * 2.328_306_436_538_696_3e-10;
        self.s0 = self.s1;
        self.s1 = self.s2;
        self.c = t.trunc();
        self.s2 = t - self.c;
        self.s2
    }

    /// Next value scaled onto the full `u32` range.
    pub fn next_u32(&mut self) -> u32 {
        (self.next_f64() * u32::MAX as f64) as u32
    }
}

/// 2D and 3D coherent noise for one seed. Values lie roughly in `[-1, 1]`.
pub struct NoiseGenerator {
    source_2d: OpenSimplex,
    source_3d: OpenSimplex,
}

impl NoiseGenerator {
    /// Builds the noise sources for a seed string.
    pub fn new(seed: &str) -> Self {
        let mut rng = SeededRng::new(seed);
        NoiseGenerator {
            source_2d: OpenSimplex::new(rng.next_u32()),
            source_3d: OpenSimplex::new(rng.next_u32()),
        }
    }

    /// Samples 2D noise.
    pub fn noise2d(&self, x: f64, z: f64) -> f64 {
        self.source_2d.get([x, z])
    }

    /// Samples 3D noise.
    pub fn noise3d(&self, x: f64, y: f64, z: f64) -> f64 {
        self.source_3d.get([x, y, z])
    }

    /// Fractal Brownian motion over the 2D source, normalised by the summed
    /// octave amplitudes so the result stays in the base noise range.
    pub fn fbm2d(&self, x: f64, z: f64, octaves: u32, lacunarity: f64, persistence: f64) -> f64 {
        let mut value = 0.0;
        let mut amplitude = 1.0;
        let mut frequency = 1.0;
        let mut max = 0.0;
        for _ in 0..octaves {
            value += self.noise2d(x * frequency, z * frequency) * amplitude;
            max += amplitude;
            amplitude *= persistence;
            frequency *= lacunarity;
        }
        if max == 0.0 {
            return 0.0;
        }
        value / max
    }
}

/// Per-seed cache of noise generators, owned by the chunk manager.
///
/// Building the permutation tables is cheap but not free; rooms rarely use
/// more than one seed, so a small LRU keeps the active one around.
pub struct NoiseCache {
    generators: LruCache<String, Arc<NoiseGenerator>>,
}

impl NoiseCache {
    /// Creates an empty cache holding up to `capacity` seeds (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        NoiseCache {
            generators: LruCache::new(capacity),
        }
    }

    /// Returns the generator for `seed`, creating it on first use.
    pub fn get_or_create(&mut self, seed: &str) -> Arc<NoiseGenerator> {
        let key = seed.to_owned();
        if let Some(generator) = self.generators.get(&key) {
            return generator.clone();
        }
        let generator = Arc::new(NoiseGenerator::new(seed));
        self.generators.put(key, generator.clone());
        generator
    }

    /// Number of cached seeds.
    pub fn len(&self) -> usize {
        self.generators.len()
    }

    /// Whether the cache holds no generators.
    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }

    /// Drops every cached generator.
    pub fn clear(&mut self) {
        self.generators.clear();
    }
}

impl Default for NoiseCache {
    fn default() -> Self {
        Self::new(NOISE_CACHE_CAPACITY)
    }
}
