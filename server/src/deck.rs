use mukatte_protocol::{CardSet, CARD_SET_SIZE};
use rand::{CryptoRng, RngCore};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeckError {
    #[error("card catalog has {have} distinct cards, need at least 24")]
    CatalogTooSmall { have: usize },

    #[error("card catalog at {path} unreadable: {source}")]
    CatalogUnreadable {
        path: String,
        source: std::io::Error,
    },

    #[error("entropy source failed: {0}")]
    Entropy(#[from] rand::Error),
}

/// Cryptographically secure randomness the registry deals from.
pub trait EntropySource: RngCore + CryptoRng + Send {}

impl<T: RngCore + CryptoRng + Send> EntropySource for T {}

/// Where the names of the available card images come from.
pub trait CardCatalog: Send + Sync {
    fn card_names(&self) -> Result<Vec<String>, DeckError>;
}

/// Catalog backed by a directory of image files. Re-read on every call.
pub struct DirCatalog {
    dir: PathBuf,
}

impl DirCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DirCatalog { dir: dir.into() }
    }
}

impl CardCatalog for DirCatalog {
    fn card_names(&self) -> Result<Vec<String>, DeckError> {
        let unreadable = |source: std::io::Error| DeckError::CatalogUnreadable {
            path: self.dir.display().to_string(),
            source,
        };
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(unreadable)? {
            let entry = entry.map_err(unreadable)?;
            if entry.file_type().map_err(unreadable)?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Fixed in-memory catalog.
pub struct StaticCatalog(Vec<String>);

impl StaticCatalog {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StaticCatalog(names.into_iter().map(Into::into).collect())
    }
}

impl CardCatalog for StaticCatalog {
    fn card_names(&self) -> Result<Vec<String>, DeckError> {
        Ok(self.0.clone())
    }
}

/// Uniform index in `0..bound`.
///
/// Draws 64-bit words from `rng` and rejects the top sliver of the range that
/// would otherwise bias `% bound` toward small indices.
pub fn draw_index<R>(rng: &mut R, bound: usize) -> Result<usize, DeckError>
where
    R: RngCore + CryptoRng + ?Sized,
{
    if bound == 0 {
        return Err(DeckError::CatalogTooSmall { have: 0 });
    }
    let bound = bound as u64;
    let limit = (u64::MAX / bound) * bound;
    loop {
        let mut word = [0u8; 8];
        rng.try_fill_bytes(&mut word)?;
        let v = u64::from_le_bytes(word);
        if v < limit {
            return Ok((v % bound) as usize);
        }
    }
}

/// Shuffles the catalog (Fisher-Yates, back to front) and keeps the first
/// [`CARD_SET_SIZE`] names. The input slice is left untouched.
pub fn generate_card_set<R>(catalog: &[String], rng: &mut R) -> Result<CardSet, DeckError>
where
    R: RngCore + CryptoRng + ?Sized,
{
    let mut cards = catalog.to_vec();
    cards.sort();
    cards.dedup();
    if cards.len() < CARD_SET_SIZE {
        return Err(DeckError::CatalogTooSmall { have: cards.len() });
    }
    for i in (1..cards.len()).rev() {
        let j = draw_index(rng, i + 1)?;
        cards.swap(i, j);
    }
    cards.truncate(CARD_SET_SIZE);
    let have = cards.len();
    CardSet::try_from(cards).map_err(|_| DeckError::CatalogTooSmall { have })
}

/// Picks a player's secret card from the board.
pub fn draw_target_card<R>(cards: &CardSet, rng: &mut R) -> Result<String, DeckError>
where
    R: RngCore + CryptoRng + ?Sized,
{
    let i = draw_index(rng, cards.len())?;
    Ok(cards.as_slice()[i].clone())
}
