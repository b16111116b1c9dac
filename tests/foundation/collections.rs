//! Integration tests for persistent lists

use trompe_foundation::LtList;

#[test]
fn cons_shares_the_tail() {
    let tail: LtList<i64> = vec![2, 3].into();
    let list = tail.cons(1);
    assert_eq!(list.len(), 3);
    assert_eq!(tail.len(), 2);
    assert_eq!(list.head(), Some(&1));
    assert_eq!(list.tail(), Some(tail));
}

#[test]
fn empty_list_has_no_head_or_tail() {
    let empty: LtList<i64> = LtList::new();
    assert!(empty.is_empty());
    assert_eq!(empty.head(), None);
    assert!(empty.tail().is_none());
}

#[test]
fn iteration_order() {
    let list: LtList<i64> = (1..=4).collect();
    assert_eq!(list.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    assert_eq!(list.get(2), Some(&3));
}
