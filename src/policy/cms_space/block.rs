//! Block encoding.
//!
//! Every block in the committed part of the space starts with one header word.  The header tells
//! free chunks, linear allocation block remainders and objects apart with a two-bit tag, so a
//! single load classifies a block.  A zero header is an allocated block whose object has not been
//! installed yet; its size is recorded in the mark bitmap instead (see
//! [`crate::util::bitmap::MarkBitMap::block_size_from_marks`]).
//!
//! ```text
//! free chunk:  | FREE  size      | next | prev | ...
//! LAB tail:    | LAB   size      | ...
//! object:      | OBJ   size refs | mark word | ref 0 | ... | ref n-1 | payload ...
//! ```

use std::sync::atomic::Ordering;

use static_assertions::const_assert;

use super::heap::HeapWords;
use crate::util::constants::{BITS_IN_WORD, MIN_CHUNK_SIZE_IN_WORDS};
use crate::util::conversions::adjust_object_size;
use crate::util::{Address, ObjectReference};

const TAG_MASK: usize = 0b11;
const TAG_FREE: usize = 0b01;
const TAG_OBJECT: usize = 0b10;
const TAG_LAB: usize = 0b11;
const SIZE_SHIFT: usize = 2;
const SIZE_BITS: usize = 32;
const SIZE_MASK: usize = (1 << SIZE_BITS) - 1;
const REFS_SHIFT: usize = SIZE_SHIFT + SIZE_BITS;

/// The largest block size a header can describe, in words.
pub const MAX_BLOCK_WORDS: usize = SIZE_MASK;
/// The largest number of reference fields an object can have.
pub const MAX_OBJECT_REFS: usize = (1 << (BITS_IN_WORD - REFS_SHIFT)) - 1;

const_assert!(REFS_SHIFT < BITS_IN_WORD);
const_assert!(MIN_CHUNK_SIZE_IN_WORDS > FREE_CHUNK_PREV);

/// Word offset of the next link in a free chunk.
pub const FREE_CHUNK_NEXT: usize = 1;
/// Word offset of the previous link in a free chunk.
pub const FREE_CHUNK_PREV: usize = 2;
/// Word offset of the mark word in an object.
pub const OBJECT_MARK_WORD: usize = 1;
/// Word offset of the first reference field in an object.
pub const OBJECT_FIRST_REF: usize = 2;
/// The number of header words every object carries before its reference fields.
pub const OBJECT_HEADER_WORDS: usize = 2;

/// The decoded header word of a block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlockHeader {
    /// Allocated, but the object header has not been installed.
    Uninitialized,
    /// A free chunk, on a free list or in the dictionary (or being coalesced by the sweeper).
    Free { size: usize },
    /// The unused tail of a linear allocation block.  Not on any free list.
    Lab { size: usize },
    /// An object.
    Object { size: usize, num_refs: usize },
}

impl BlockHeader {
    pub fn decode(word: usize) -> BlockHeader {
        if word == 0 {
            return BlockHeader::Uninitialized;
        }
        let size = (word >> SIZE_SHIFT) & SIZE_MASK;
        match word & TAG_MASK {
            TAG_FREE => BlockHeader::Free { size },
            TAG_LAB => BlockHeader::Lab { size },
            TAG_OBJECT => BlockHeader::Object {
                size,
                num_refs: word >> REFS_SHIFT,
            },
            _ => panic!("Corrupted block header {:#x}", word),
        }
    }

    pub fn encode(self) -> usize {
        match self {
            BlockHeader::Uninitialized => 0,
            BlockHeader::Free { size } => {
                debug_assert!(size <= MAX_BLOCK_WORDS);
                (size << SIZE_SHIFT) | TAG_FREE
            }
            BlockHeader::Lab { size } => {
                debug_assert!(size <= MAX_BLOCK_WORDS);
                (size << SIZE_SHIFT) | TAG_LAB
            }
            BlockHeader::Object { size, num_refs } => {
                debug_assert!(size <= MAX_BLOCK_WORDS);
                debug_assert!(num_refs <= MAX_OBJECT_REFS);
                (num_refs << REFS_SHIFT) | (size << SIZE_SHIFT) | TAG_OBJECT
            }
        }
    }

    /// The block size, or `None` for an uninitialized block.
    pub fn size(self) -> Option<usize> {
        match self {
            BlockHeader::Uninitialized => None,
            BlockHeader::Free { size }
            | BlockHeader::Lab { size }
            | BlockHeader::Object { size, .. } => Some(size),
        }
    }

    pub fn is_free(self) -> bool {
        matches!(self, BlockHeader::Free { .. })
    }

    pub fn is_object(self) -> bool {
        matches!(self, BlockHeader::Object { .. })
    }
}

/// A copy of an object that lives outside the old generation, such as a young object that is
/// being promoted.
#[derive(Clone, Debug, Default)]
pub struct ObjectImage<'a> {
    /// The mark word (header bits owned by the runtime).
    pub mark: usize,
    /// Reference fields.
    pub refs: &'a [ObjectReference],
    /// Non-reference payload words.
    pub payload: &'a [usize],
}

impl ObjectImage<'_> {
    /// The size of the block the object needs in the old generation.
    pub fn size_in_words(&self) -> usize {
        object_size_in_words(self.refs.len(), self.payload.len())
    }
}

/// The block size needed for an object with `num_refs` reference fields and `payload_words`
/// words of other data.
pub const fn object_size_in_words(num_refs: usize, payload_words: usize) -> usize {
    adjust_object_size(OBJECT_HEADER_WORDS + num_refs + payload_words)
}

impl HeapWords {
    /// Read a block header.  The acquire pairs with the release in the `set_header` that
    /// published the block.
    pub fn header(&self, block: Address) -> BlockHeader {
        BlockHeader::decode(self.load(block, Ordering::Acquire))
    }

    pub fn set_header(&self, block: Address, header: BlockHeader) {
        self.store(block, header.encode(), Ordering::Release)
    }

    /// Write a free chunk of `size` words at `chunk` with empty links.  The header is written
    /// last so a concurrent reader never sees a free header with stale links.
    pub fn write_free_chunk(&self, chunk: Address, size: usize) {
        debug_assert!(size >= MIN_CHUNK_SIZE_IN_WORDS, "chunk of {} words", size);
        self.store(chunk.add_words(FREE_CHUNK_NEXT), 0, Ordering::Relaxed);
        self.store(chunk.add_words(FREE_CHUNK_PREV), 0, Ordering::Relaxed);
        self.set_header(chunk, BlockHeader::Free { size });
    }

    pub fn chunk_next(&self, chunk: Address) -> Address {
        Address::from_usize(self.load(chunk.add_words(FREE_CHUNK_NEXT), Ordering::Relaxed))
    }

    pub fn chunk_prev(&self, chunk: Address) -> Address {
        Address::from_usize(self.load(chunk.add_words(FREE_CHUNK_PREV), Ordering::Relaxed))
    }

    pub fn set_chunk_next(&self, chunk: Address, next: Address) {
        self.store(
            chunk.add_words(FREE_CHUNK_NEXT),
            next.as_usize(),
            Ordering::Relaxed,
        )
    }

    pub fn set_chunk_prev(&self, chunk: Address, prev: Address) {
        self.store(
            chunk.add_words(FREE_CHUNK_PREV),
            prev.as_usize(),
            Ordering::Relaxed,
        )
    }

    /// The size of a free chunk.  Panics if the block is not free.
    pub fn chunk_size(&self, chunk: Address) -> usize {
        match self.header(chunk) {
            BlockHeader::Free { size } => size,
            other => panic!("{} is not a free chunk: {:?}", chunk, other),
        }
    }

    /// Install an object into an allocated block.  Reference fields are written before the
    /// header, so a marker that sees the header also sees the fields.
    pub fn install_object(&self, block: Address, size: usize, image: &ObjectImage) {
        debug_assert!(size >= image.size_in_words());
        self.store(block.add_words(OBJECT_MARK_WORD), image.mark, Ordering::Relaxed);
        let first_ref = block.add_words(OBJECT_FIRST_REF);
        for (i, r) in image.refs.iter().enumerate() {
            self.store(first_ref.add_words(i), r.value(), Ordering::Relaxed);
        }
        let payload = first_ref.add_words(image.refs.len());
        self.copy_from_slice(payload, image.payload);
        let tail = OBJECT_HEADER_WORDS + image.refs.len() + image.payload.len();
        if size > tail {
            self.fill(block.add_words(tail), size - tail, 0);
        }
        self.set_header(
            block,
            BlockHeader::Object {
                size,
                num_refs: image.refs.len(),
            },
        );
    }

    /// The number of reference fields of an installed object.
    pub fn object_num_refs(&self, object: ObjectReference) -> usize {
        match self.header(object.to_raw_address()) {
            BlockHeader::Object { num_refs, .. } => num_refs,
            other => panic!("{} is not an object: {:?}", object, other),
        }
    }

    pub fn ref_slot(&self, object: ObjectReference, index: usize) -> Address {
        object.to_raw_address().add_words(OBJECT_FIRST_REF + index)
    }

    pub fn read_ref(&self, object: ObjectReference, index: usize) -> ObjectReference {
        let raw = self.load(self.ref_slot(object, index), Ordering::Acquire);
        ObjectReference::from_raw_address(Address::from_usize(raw))
    }

    pub fn write_ref(&self, object: ObjectReference, index: usize, target: ObjectReference) {
        self.store(
            self.ref_slot(object, index),
            target.value(),
            Ordering::Release,
        )
    }

    pub fn mark_word(&self, object: ObjectReference) -> usize {
        self.load(
            object.to_raw_address().add_words(OBJECT_MARK_WORD),
            Ordering::Relaxed,
        )
    }

    pub fn set_mark_word(&self, object: ObjectReference, mark: usize) {
        self.store(
            object.to_raw_address().add_words(OBJECT_MARK_WORD),
            mark,
            Ordering::Relaxed,
        )
    }

    /// Read a payload word of an installed object.
    pub fn read_payload(&self, object: ObjectReference, index: usize) -> usize {
        let num_refs = self.object_num_refs(object);
        self.load(
            object
                .to_raw_address()
                .add_words(OBJECT_FIRST_REF + num_refs + index),
            Ordering::Relaxed,
        )
    }

    /// Visit every non-null reference field of an installed object.
    pub fn for_each_ref<F: FnMut(ObjectReference)>(&self, object: ObjectReference, mut f: F) {
        let num_refs = self.object_num_refs(object);
        for i in 0..num_refs {
            let r = self.read_ref(object, i);
            if !r.is_null() {
                f(r);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_encoding() {
        for header in [
            BlockHeader::Free { size: 4 },
            BlockHeader::Lab { size: 1 << 20 },
            BlockHeader::Object {
                size: 40,
                num_refs: 3,
            },
            BlockHeader::Object {
                size: MAX_BLOCK_WORDS,
                num_refs: MAX_OBJECT_REFS,
            },
        ] {
            assert_eq!(BlockHeader::decode(header.encode()), header);
        }
        assert_eq!(BlockHeader::decode(0), BlockHeader::Uninitialized);
        assert_eq!(BlockHeader::Uninitialized.size(), None);
        assert!(BlockHeader::Free { size: 8 }.is_free());
        assert!(!BlockHeader::Lab { size: 8 }.is_free());
    }

    #[test]
    fn object_fields() {
        let heap = HeapWords::new(Address::from_usize(0x4000), 4096);
        let block = heap.start().add_words(8);
        let other = ObjectReference::from_raw_address(heap.start());
        let refs = [other, ObjectReference::NULL];
        let image = ObjectImage {
            mark: 0x55,
            refs: &refs,
            payload: &[7, 8],
        };
        assert_eq!(image.size_in_words(), 6);
        heap.install_object(block, 6, &image);
        let obj = ObjectReference::from_raw_address(block);
        assert_eq!(heap.mark_word(obj), 0x55);
        assert_eq!(heap.object_num_refs(obj), 2);
        assert_eq!(heap.read_ref(obj, 0), other);
        assert_eq!(heap.read_payload(obj, 1), 8);
        let mut seen = vec![];
        heap.for_each_ref(obj, |r| seen.push(r));
        assert_eq!(seen, vec![other]);
    }

    #[test]
    fn free_chunk_links() {
        let heap = HeapWords::new(Address::from_usize(0x4000), 4096);
        let a = heap.start();
        let b = a.add_words(16);
        heap.write_free_chunk(a, 16);
        heap.write_free_chunk(b, 32);
        heap.set_chunk_next(a, b);
        heap.set_chunk_prev(b, a);
        assert_eq!(heap.chunk_size(a), 16);
        assert_eq!(heap.chunk_next(a), b);
        assert_eq!(heap.chunk_prev(b), a);
        assert!(heap.chunk_next(b).is_zero());
    }
}
