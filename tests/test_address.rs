extern crate mmtk_cms;

use mmtk_cms::util::{Address, ObjectReference};

#[test]
fn test_align_up() {
    let addr = Address::from_usize(0);
    let aligned = addr.align_up(8);

    assert_eq!(addr, aligned);
    assert_eq!(Address::from_usize(9).align_up(8), Address::from_usize(16));
}

#[test]
fn test_is_aligned() {
    let addr = Address::from_usize(0);
    assert!(addr.is_aligned_to(8));

    let addr = Address::from_usize(8);
    assert!(addr.is_aligned_to(8));
    assert!(addr.is_word_aligned());
}

#[test]
fn test_words() {
    let start = Address::from_usize(0x1000);
    let end = start.add_words(4);
    assert_eq!(end.words_from(start), 4);
    assert_eq!(end.sub_words(4), start);
}

#[test]
fn test_object_reference() {
    assert!(ObjectReference::NULL.is_null());
    let addr = Address::from_usize(0x1000);
    let object = ObjectReference::from_raw_address(addr);
    assert!(!object.is_null());
    assert_eq!(object.to_raw_address(), addr);
}
