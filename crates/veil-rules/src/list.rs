/// Add or remove `item`, keeping the list sorted and free of duplicates.
/// An empty result collapses to `None` so the field drops out of the rule.
pub fn include_in_list<T: Ord + Clone>(list: Option<Vec<T>>, item: &T, include: bool) -> Option<Vec<T>> {
    let mut list = list.unwrap_or_default();
    list.sort();
    list.dedup();

    match (list.binary_search(item), include) {
        (Err(pos), true) => list.insert(pos, item.clone()),
        (Ok(pos), false) => {
            list.remove(pos);
        }
        _ => {}
    }

    if list.is_empty() {
        None
    } else {
        Some(list)
    }
}
