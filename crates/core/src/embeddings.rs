/// Width of the vectors produced by [`CharacterNgramEmbedder::default`].
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 256;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Text to fixed-dimension vector. Implementations must return the same
/// vector for the same text.
pub trait Embedder {
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;

    fn encode(&self, texts: &[String]) -> Vec<Vec<f32>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

impl<E: Embedder + ?Sized> Embedder for &E {
    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        (**self).embed(text)
    }
}

/// Hashed bag of lower-cased character trigrams, L2-normalised.
///
/// Needs no model files, so indexing and tests are fully offline.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let buckets = self.dimensions.max(1);
        let mut vector = vec![0f32; buckets];
        let chars: Vec<char> = text.to_lowercase().chars().collect();

        let mut utf8 = [0u8; 12];
        for trigram in chars.windows(3) {
            let mut used = 0;
            for ch in trigram {
                used += ch.encode_utf8(&mut utf8[used..]).len();
            }
            vector[(fnv1a(&utf8[..used]) % buckets as u64) as usize] += 1.0;
        }

        normalize(&mut vector);
        vector
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(FNV_OFFSET, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME))
}

fn normalize(vector: &mut [f32]) {
    let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        vector.iter_mut().for_each(|value| *value /= magnitude);
    }
}

/// Cosine similarity; zero when either side is empty, zero-length or of a
/// different dimension.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let left_norm = left.iter().map(|a| a * a).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|b| b * b).sum::<f32>().sqrt();

    if left_norm < f32::EPSILON || right_norm < f32::EPSILON {
        0.0
    } else {
        dot / (left_norm * right_norm)
    }
}

pub fn cosine_distance(left: &[f32], right: &[f32]) -> f32 {
    1.0 - cosine_similarity(left, right)
}

#[cfg(test)]
mod tests {
    use super::{cosine_similarity, CharacterNgramEmbedder, Embedder};

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Salinity tolerance of lowland rice");
        let second = embedder.embed("Salinity tolerance of lowland rice");
        assert_eq!(first, second);
    }

    #[test]
    fn vector_width_follows_dimensions_and_short_text_is_zero() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        assert_eq!(embedder.embed("abc").len(), 32);
        assert!(embedder.embed("ab").iter().all(|value| *value == 0.0));
    }

    #[test]
    fn shared_trigrams_are_closer_than_unrelated_text() {
        let embedder = CharacterNgramEmbedder::default();
        let query = embedder.embed("mangrove mangrove");
        let related = embedder.embed("Mangrove seedlings in mangrove mud");
        let unrelated = embedder.embed("quartz pH buffer kinetics");
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn encode_embeds_each_text_in_order() {
        let embedder = CharacterNgramEmbedder::default();
        let texts = vec!["soil science".to_string(), "plant pathology".to_string()];
        let vectors = embedder.encode(&texts);

        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[1], embedder.embed("plant pathology"));
    }

    #[test]
    fn cosine_of_identical_text_is_one_and_zero_vector_is_zero() {
        let embedder = CharacterNgramEmbedder::default();
        let vector = embedder.embed("entomology");
        assert!((cosine_similarity(&vector, &vector) - 1.0).abs() < 1e-5);
        assert_eq!(cosine_similarity(&vector, &vec![0.0; vector.len()]), 0.0);
    }
}
