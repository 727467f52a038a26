use crate::util::constants::*;
use crate::util::Address;

/* Alignment */

pub fn is_address_aligned(addr: Address) -> bool {
    addr.is_aligned_to(BYTES_IN_WORD)
}

pub const fn raw_align_up(val: usize, align: usize) -> usize {
    // See https://github.com/rust-lang/rust/blob/e620d0f337d0643c757bab791fc7d88d63217704/src/libcore/alloc.rs#L192
    val.wrapping_add(align).wrapping_sub(1) & !align.wrapping_sub(1)
}

pub const fn raw_align_down(val: usize, align: usize) -> usize {
    val & !align.wrapping_sub(1)
}

pub const fn raw_is_aligned(val: usize, align: usize) -> bool {
    val & align.wrapping_sub(1) == 0
}

/* Conversion */

pub const fn bytes_to_words(bytes: usize) -> usize {
    bytes >> LOG_BYTES_IN_WORD
}

pub const fn bytes_to_words_up(bytes: usize) -> usize {
    (bytes + BYTES_IN_WORD - 1) >> LOG_BYTES_IN_WORD
}

pub const fn words_to_bytes(words: usize) -> usize {
    words << LOG_BYTES_IN_WORD
}

pub fn card_align_down(addr: Address) -> Address {
    addr.align_down(BYTES_IN_CARD)
}

pub fn card_align_up(addr: Address) -> Address {
    addr.align_up(BYTES_IN_CARD)
}

/// Round a requested object size up to the minimum chunk size and the object alignment.
pub const fn adjust_object_size(words: usize) -> usize {
    let aligned = raw_align_up(words, MIN_OBJ_ALIGNMENT_IN_WORDS);
    if aligned < MIN_CHUNK_SIZE_IN_WORDS {
        MIN_CHUNK_SIZE_IN_WORDS
    } else {
        aligned
    }
}

pub fn bytes_to_formatted_string(bytes: usize) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
    let mut i = 0;
    let mut num = bytes;
    while i < UNITS.len() - 1 {
        let new_num = num >> 10;
        if new_num == 0 {
            return format!("{}{}", num, UNITS[i]);
        }
        num = new_num;
        i += 1;
    }
    format!("{}{}", num, UNITS.last().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjust_object_size() {
        assert_eq!(adjust_object_size(0), MIN_CHUNK_SIZE_IN_WORDS);
        assert_eq!(adjust_object_size(1), MIN_CHUNK_SIZE_IN_WORDS);
        assert_eq!(adjust_object_size(4), 4);
        assert_eq!(adjust_object_size(40), 40);
    }

    #[test]
    fn test_words_and_bytes() {
        assert_eq!(bytes_to_words(64), 8);
        assert_eq!(bytes_to_words(65), 8);
        assert_eq!(bytes_to_words_up(65), 9);
        assert_eq!(words_to_bytes(9), 72);
    }

    #[test]
    fn test_card_align() {
        let a = Address::from_usize(0x1000 + 17);
        assert_eq!(card_align_down(a), Address::from_usize(0x1000));
        assert_eq!(card_align_up(a), Address::from_usize(0x1200));
    }

    #[test]
    fn test_bytes_to_formatted_string() {
        assert_eq!(bytes_to_formatted_string(0), "0B");
        assert_eq!(bytes_to_formatted_string(1023), "1023B");
        assert_eq!(bytes_to_formatted_string(1024), "1KiB");
        assert_eq!(bytes_to_formatted_string(1024 * 1024 * 3), "3MiB");
    }
}
