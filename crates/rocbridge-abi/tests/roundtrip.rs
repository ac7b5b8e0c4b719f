use proptest::prelude::*;
use rocbridge_abi::marshal::{bytes_from_host, bytes_into_host, str_from_host, str_into_host};
use rocbridge_abi::{alloc_stats, reset_alloc_stats, RocStr, SMALL_STR_MAX_LEN, STR_SIZE};

#[test]
fn boundary_lengths_roundtrip() {
    for len in [0, STR_SIZE - 2, STR_SIZE + 16] {
        reset_alloc_stats();
        let text = "q".repeat(len);
        let value = str_from_host(text.as_str()).unwrap();
        assert_eq!(value.is_small(), len <= SMALL_STR_MAX_LEN);
        assert_eq!(str_into_host(value).unwrap(), text);
        assert_eq!(alloc_stats().live_allocs, 0, "len={len}");
    }
}

#[test]
fn empty_value_has_no_backing_allocation() {
    let value = str_from_host("").unwrap();
    let (data, len, capacity) = value.raw_parts();
    assert!(data.is_null());
    assert_eq!(len, 0);
    assert_eq!(capacity, isize::MIN as usize);

    let bytes = bytes_from_host(&b""[..]).unwrap();
    assert_eq!(bytes.raw_parts(), (std::ptr::null(), 0, isize::MIN as usize));
    assert!(bytes_into_host(bytes).is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn strings_roundtrip_and_release(text in any::<String>()) {
        reset_alloc_stats();
        let value = str_from_host(text.as_str()).unwrap();
        prop_assert_eq!(value.len(), text.len());
        prop_assert_eq!(value.is_small(), text.len() + 1 < STR_SIZE);

        let copy = value.clone();
        prop_assert_eq!(str_into_host(value).unwrap(), text.clone());
        prop_assert_eq!(copy.to_str().unwrap(), text.as_str());
        drop(copy);
        prop_assert_eq!(alloc_stats().live_allocs, 0);
    }

    #[test]
    fn substrings_match_str_slicing(text in "[a-zé ]{0,80}", a in 0usize..90, b in 0usize..90) {
        let value = RocStr::new(&text).unwrap();
        let (start, end) = (a.min(b), a.max(b));
        match value.substr(start..end) {
            Some(sub) => prop_assert_eq!(sub.to_str().unwrap(), &text[start..end]),
            None => prop_assert!(text.get(start..end).is_none()),
        }
    }

    #[test]
    fn bytes_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        reset_alloc_stats();
        let value = bytes_from_host(&data).unwrap();
        prop_assert_eq!(value.as_slice(), data.as_slice());
        prop_assert_eq!(bytes_into_host(value), data);
        prop_assert_eq!(alloc_stats().live_allocs, 0);
    }
}
