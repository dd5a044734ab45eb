#[cfg(test)]
mod rope_tests {
    use proptest::prelude::*;
    use rope_eval::rope::{Rope, RopeError, RopeShape};

    fn join(parts: &[String]) -> Rope {
        parts.iter().fold(Rope::empty(), |acc, part| {
            Rope::concat(&acc, &Rope::from_str(part)).unwrap()
        })
    }

    proptest! {
        #[test]
        fn concat_then_flatten_round_trips(a in "\\PC*", b in "\\PC*") {
            let rope = Rope::concat(&Rope::from_str(&a), &Rope::from_str(&b)).unwrap();

            prop_assert_eq!(rope.len(), Rope::from_str(&a).len() + Rope::from_str(&b).len());
            prop_assert_eq!(rope.to_string_lossy(), format!("{}{}", a, b));
        }

        #[test]
        fn nul_and_latin1_survive_flattening(parts in prop::collection::vec("[\\x00-\\xff]{0,8}", 0..16)) {
            let rope = join(&parts);
            prop_assert_eq!(rope.to_string_lossy(), parts.concat());
        }

        #[test]
        fn equality_ignores_tree_shape(parts in prop::collection::vec("[a-z\\x00\u{3042}]{0,6}", 1..12)) {
            let left = join(&parts);

            let right = parts.iter().rev().fold(Rope::empty(), |acc, part| {
                Rope::concat(&Rope::from_str(part), &acc).unwrap()
            });

            let flat = Rope::from_str(&parts.concat());

            prop_assert!(left.equals(&right));
            prop_assert!(left.equals(&flat));
            prop_assert_eq!(left.cmp(&right), std::cmp::Ordering::Equal);
        }

        #[test]
        fn char_at_matches_flattened_content(text in "[a-z\u{3042}\\x00]{1,40}", split in 0usize..40) {
            let units: Vec<u16> = text.encode_utf16().collect();
            let split = split.min(units.len());

            let rope = Rope::concat(
                &Rope::from_utf16(&units[..split]),
                &Rope::from_utf16(&units[split..]),
            )
            .unwrap();

            for (i, unit) in units.iter().enumerate() {
                prop_assert_eq!(rope.char_at(i), Ok(*unit));
            }
            prop_assert!(!rope.is_flat() || split == 0 || split == units.len());
        }
    }

    #[test]
    fn test_rope_01_empty_operand_returns_other_unchanged() {
        let s = Rope::from_str("abc");
        let empty = Rope::empty();

        assert!(Rope::ptr_eq(&Rope::concat(&s, &empty).unwrap(), &s));
        assert!(Rope::ptr_eq(&Rope::concat(&empty, &s).unwrap(), &s));
        assert!(Rope::concat(&empty, &empty).unwrap().is_empty());
    }

    #[test]
    fn test_rope_02_flatten_is_idempotent() {
        let rope = join(&["ab".into(), "\0".into(), "cd".into()]);
        assert_eq!(rope.shape(), RopeShape::Concat);

        let first = rope.flatten();
        let second = rope.flatten();

        assert!(first.same_buffer(&second));
        assert_eq!(first, second);
        assert_eq!(rope.to_string_lossy(), "ab\0cd");
        assert_eq!(rope.len(), 5);
    }

    #[test]
    fn test_rope_03_hundred_thousand_concatenations() {
        let piece = Rope::from_str("x");
        let mut rope = Rope::empty();

        for _ in 0..100_000 {
            rope = Rope::concat(&rope, &piece).unwrap();
        }

        assert_eq!(rope.len(), 100_000);
        assert_eq!(rope.depth(), 99_999);
        assert_eq!(rope.char_at(99_999), Ok(u16::from(b'x')));

        let flat = rope.flatten();
        assert_eq!(flat.len(), 100_000);
        assert!(flat.code_units().all(|u| u == u16::from(b'x')));
        assert_eq!(rope.depth(), 0);
    }

    #[test]
    fn test_rope_04_deep_rope_drops_without_recursion() {
        let mut rope = Rope::from_str("y");
        for _ in 0..200_000 {
            rope = Rope::concat(&Rope::from_str("x"), &rope).unwrap();
        }
        assert_eq!(rope.len(), 200_001);
        drop(rope);
    }

    #[test]
    fn test_rope_05_alias_transparency_under_append() {
        let a = Rope::concat(&Rope::from_str("foo"), &Rope::from_str("bar")).unwrap();
        let b = a.clone();

        let appended = a.append(&Rope::from_str("baz")).unwrap();

        assert_eq!(b.to_string_lossy(), "foobar");
        assert_eq!(appended.to_string_lossy(), "foobarbaz");
        assert!(!Rope::ptr_eq(&appended, &b));
    }

    #[test]
    fn test_rope_06_unique_append_reuses_node() {
        let mut rope = Rope::concat(&Rope::from_str("a"), &Rope::from_str("b")).unwrap();
        let addr = rope.node_addr();

        for _ in 0..1000 {
            rope = rope.append(&Rope::from_str("c")).unwrap();
        }

        assert_eq!(rope.node_addr(), addr);
        assert_eq!(rope.len(), 1002);
        assert_eq!(rope.depth(), 1);
    }

    #[test]
    fn test_rope_07_wide_content_widens_on_flatten() {
        let rope = Rope::concat(&Rope::from_str("a"), &Rope::from_str("\u{3042}")).unwrap();

        assert!(rope.is_wide());
        assert!(rope.flatten().as_wide().is_some());
        assert_eq!(rope.char_at(1), Ok(0x3042));
    }

    #[test]
    fn test_rope_08_char_at_out_of_range() {
        let rope = Rope::from_str("ab");
        assert_eq!(
            rope.char_at(2),
            Err(RopeError::IndexOutOfRange {
                index: 2,
                length: 2
            })
        );
    }

    #[test]
    fn test_rope_09_code_unit_ordering() {
        let a = Rope::concat(&Rope::from_str("ap"), &Rope::from_str("ple")).unwrap();
        let b = Rope::from_str("apricot");

        assert!(a < b);
        assert_eq!(a, Rope::from_str("apple"));
    }

    #[test]
    fn test_rope_10_indexing_a_wide_appended_node() {
        let x = Rope::from_str("x");
        let yz = Rope::from_str("yz");

        let mut rope = Rope::empty();
        for _ in 0..100_000 {
            rope = rope.append(&x).unwrap();
            rope = rope.append(&yz).unwrap();
        }

        assert_eq!(rope.len(), 300_000);
        assert_eq!(rope.children().len(), 200_000);

        for i in 0..rope.len() {
            assert_eq!(rope.char_at(i), Ok(u16::from(b"xyz"[i % 3])), "index {}", i);
        }
        assert_eq!(rope.shape(), RopeShape::Concat);
    }
}
