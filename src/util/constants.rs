/// log2 of the number of bits in a byte
pub const LOG_BITS_IN_BYTE: u8 = 3;
/// The number of bits in a byte
pub const BITS_IN_BYTE: usize = 1 << LOG_BITS_IN_BYTE;

/// log2 of the number of bytes in a megabyte
pub const LOG_BYTES_IN_MBYTE: u8 = 20;
/// The number of bytes in a megabyte
pub const BYTES_IN_MBYTE: usize = 1 << LOG_BYTES_IN_MBYTE;

/// log2 of the number of bytes in a kilobyte
pub const LOG_BYTES_IN_KBYTE: u8 = 10;
/// The number of bytes in a kilobyte
pub const BYTES_IN_KBYTE: usize = 1 << LOG_BYTES_IN_KBYTE;

/// log2 of the number of bytes in a word. The collector only supports 64-bit words: block
/// headers pack a tag, a size and a reference count into one word.
pub const LOG_BYTES_IN_WORD: u8 = 3;
/// The number of bytes in a word
pub const BYTES_IN_WORD: usize = 1 << LOG_BYTES_IN_WORD;
/// log2 of the number of bits in a word
pub const LOG_BITS_IN_WORD: usize = LOG_BITS_IN_BYTE as usize + LOG_BYTES_IN_WORD as usize;
/// The number of bits in a word
pub const BITS_IN_WORD: usize = 1 << LOG_BITS_IN_WORD;

static_assertions::const_assert_eq!(BYTES_IN_WORD, std::mem::size_of::<usize>());

/// log2 of the number of bytes in a card. Cards are the unit of the card table, the mod-union
/// table and the block offset table.
pub const LOG_BYTES_IN_CARD: u8 = 9;
/// The number of bytes in a card
pub const BYTES_IN_CARD: usize = 1 << LOG_BYTES_IN_CARD;
/// The number of words in a card
pub const WORDS_IN_CARD: usize = BYTES_IN_CARD >> LOG_BYTES_IN_WORD;

/// The smallest block the free-list space hands out or keeps on a free list: a header word, the
/// two free-list links, and one more word so that a chunk never looks like a bare header.
pub const MIN_CHUNK_SIZE_IN_WORDS: usize = 4;
/// Object sizes are rounded up to this many words.
pub const MIN_OBJ_ALIGNMENT_IN_WORDS: usize = 1;

/// Requests below this size are served from the small linear allocation block.
pub const SMALL_FOR_LINEAR_ALLOC: usize = 16;
/// Chunks of at least this size live in the dictionary; smaller ones in the indexed lists.
pub const SMALL_FOR_DICTIONARY: usize = 257;
/// The number of slots of the indexed free list array (one per size below the dictionary).
pub const INDEX_SET_SIZE: usize = SMALL_FOR_DICTIONARY;
/// The smallest size with an indexed free list.
pub const INDEX_SET_START: usize = MIN_CHUNK_SIZE_IN_WORDS;
/// The step between consecutive indexed free list sizes.
pub const INDEX_SET_STRIDE: usize = MIN_OBJ_ALIGNMENT_IN_WORDS;
