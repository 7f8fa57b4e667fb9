use crate::{Error, wire::Header};
use std::fmt;
use tracing::debug;

/// Stable position of an image in the whitelist, used as its wire index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageIndex(u8);

impl ImageIndex {
    pub fn get(self) -> u64 {
        self.0.into()
    }
}

impl fmt::Display for ImageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What the hot path needs to turn an address into a record.
///
/// Handed out at instrumentation time so each hit avoids a whitelist scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRef {
    pub index: ImageIndex,
    pub low: u64,
}

impl ImageRef {
    pub fn offset_of(&self, address: u64) -> u64 {
        address.wrapping_sub(self.low)
    }
}

/// A whitelisted image.
///
/// Starts as a stub carrying only the configured pattern; the address range
/// is filled in when a matching image loads and left in place (but inert)
/// when it unloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pattern: String,
    /// Full path of the image that claimed this slot, if any.
    path: Option<String>,
    low: u64,
    high: u64,
    loaded: bool,
    index: ImageIndex,
}

impl Image {
    fn stub(pattern: String, index: ImageIndex) -> Self {
        Self {
            pattern,
            path: None,
            low: 0,
            high: 0,
            loaded: false,
            index,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn index(&self) -> ImageIndex {
        self.index
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Inclusive address range of the image.
    pub fn bounds(&self) -> (u64, u64) {
        (self.low, self.high)
    }

    pub fn contains(&self, address: u64) -> bool {
        self.loaded && self.low <= address && address <= self.high
    }

    fn handle(&self) -> ImageRef {
        ImageRef {
            index: self.index,
            low: self.low,
        }
    }
}

/// Fixed-length table of images of interest, addressed by [`ImageIndex`].
///
/// The length is set once from configuration; only the load state and
/// bounds of existing slots ever change.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    images: Box<[Image]>,
    header: Header,
}

impl Whitelist {
    /// Build one stub per pattern, indexed in the given order.
    pub fn new<I, S>(patterns: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let header = Header::new(patterns.into_iter().map(Into::into).collect())?;
        let images = header
            .images()
            .iter()
            .enumerate()
            // the header holds at most 255 images
            .map(|(i, pattern)| Image::stub(pattern.clone(), ImageIndex(i as u8)))
            .collect::<Box<[_]>>();

        debug!(len = images.len(), "whitelist initialized");
        Ok(Self { images, header })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn get(&self, index: ImageIndex) -> Option<&Image> {
        self.images.get(usize::from(index.0))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Image> {
        self.images.iter()
    }

    /// Claim the first slot whose pattern occurs in `path`.
    ///
    /// Returns `None` when no pattern matches, ie. the image is not of
    /// interest. A slot that is already loaded is overwritten.
    pub fn register(&mut self, path: &str, low: u64, high: u64) -> Option<ImageIndex> {
        let Some(image) = self
            .images
            .iter_mut()
            .find(|image| path.contains(image.pattern.as_str()))
        else {
            debug!(path, "image skipped");
            return None;
        };

        image.path = Some(path.to_owned());
        image.low = low;
        image.high = high;
        image.loaded = true;
        debug!(path, index = %image.index, low, high, "image loaded");
        Some(image.index)
    }

    /// First loaded image whose bounds contain `address`.
    pub fn resolve(&self, address: u64) -> Option<ImageRef> {
        self.images
            .iter()
            .find(|image| image.contains(address))
            .map(Image::handle)
    }

    /// Mark the loaded image starting at `low` as gone.
    pub fn unload(&mut self, low: u64) -> Option<ImageIndex> {
        let image = self
            .images
            .iter_mut()
            .find(|image| image.loaded && image.low == low)?;
        image.loaded = false;
        debug!(path = image.path.as_deref(), index = %image.index, "image unloaded");
        Some(image.index)
    }

    /// The header describing this whitelist, independent of load state.
    pub fn header(&self) -> &Header {
        &self.header
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn stubs_are_indexed_in_order() {
        let whitelist = Whitelist::new(["libfoo", "libbar"]).unwrap();
        let indices: Vec<_> = whitelist.iter().map(|image| image.index().get()).collect();
        assert_eq!(indices, vec![0, 1]);
        assert!(whitelist.iter().all(|image| !image.is_loaded()));
    }

    #[test]
    fn load_resolve_unload() {
        let mut whitelist = Whitelist::new(["libfoo", "libbar"]).unwrap();
        let index = whitelist.register("/usr/lib/libfoo.so.1", 0x1000, 0x1fff);
        assert_eq!(index.map(ImageIndex::get), Some(0));

        let image = whitelist.resolve(0x1500).unwrap();
        assert_eq!(image.index.get(), 0);
        assert_eq!(image.offset_of(0x1500), 0x500);

        assert_eq!(whitelist.unload(0x1000).map(ImageIndex::get), Some(0));
        assert_eq!(whitelist.resolve(0x1500), None);
        // the slot keeps its identity
        let image = whitelist.get(ImageIndex(0)).unwrap();
        assert_eq!(image.pattern(), "libfoo");
        assert_eq!(image.path(), Some("/usr/lib/libfoo.so.1"));
    }

    #[test]
    fn unmatched_image_is_not_tracked() {
        let mut whitelist = Whitelist::new(["libfoo"]).unwrap();
        assert_eq!(whitelist.register("/usr/lib/libc.so.6", 0x1000, 0x2000), None);
        assert_eq!(whitelist.resolve(0x1500), None);
    }

    #[test]
    fn earliest_pattern_wins() {
        let mut whitelist = Whitelist::new(["lib", "libfoo"]).unwrap();
        let index = whitelist.register("/usr/lib/libfoo.so", 0x1000, 0x2000);
        assert_eq!(index.map(ImageIndex::get), Some(0));
        assert!(!whitelist.get(ImageIndex(1)).unwrap().is_loaded());
    }

    #[test]
    fn unload_requires_matching_low_bound() {
        let mut whitelist = Whitelist::new(["libfoo"]).unwrap();
        whitelist.register("libfoo.so", 0x1000, 0x2000);
        assert_eq!(whitelist.unload(0x1500), None);
        assert!(whitelist.resolve(0x1500).is_some());
    }

    #[test]
    fn header_ignores_load_state() {
        let mut whitelist = Whitelist::new(["libfoo", "libbar"]).unwrap();
        let before = whitelist.header().clone();
        whitelist.register("/opt/libbar.so", 0x4000, 0x5000);
        assert_eq!(whitelist.header(), &before);
        assert_eq!(before.images(), ["libfoo", "libbar"]);
    }

    #[test]
    fn too_many_patterns_are_rejected() {
        let patterns = (0..256).map(|i| format!("lib{i}"));
        assert!(matches!(
            Whitelist::new(patterns),
            Err(Error::Config(config::Error::TooManyImages(256)))
        ));
    }

    prop_compose! {
        fn arbitrary_patterns()(patterns in prop::collection::vec("[a-c]{1,3}", 1..8)) -> Vec<String> {
            patterns
        }
    }

    proptest! {
        #[test]
        fn register_claims_earliest_match(patterns in arbitrary_patterns(), path in "[a-c]{0,8}") {
            let mut whitelist = Whitelist::new(patterns.clone()).unwrap();
            let expected = patterns.iter().position(|p| path.contains(p.as_str()));
            let claimed = whitelist.register(&path, 0x1000, 0x2000).map(|i| i.get() as usize);
            prop_assert_eq!(claimed, expected);
        }

        #[test]
        fn resolve_respects_bounds(low in 0u64..1 << 40, len in 0u64..1 << 20, address in 0u64..1 << 41) {
            let mut whitelist = Whitelist::new(["img", "never"]).unwrap();
            let high = low + len;
            whitelist.register("img", low, high);
            let found = whitelist.resolve(address).is_some();
            prop_assert_eq!(found, low <= address && address <= high);

            whitelist.unload(low);
            prop_assert!(whitelist.resolve(address).is_none());
        }
    }
}
