//! Tag-intersection matching rule.
//!
//! A product is a candidate for a user when at least one of its tags is among the
//! user's interests. Comparison is exact and case-sensitive; any normalization happens
//! before tags reach this module. Nothing here ranks: ordering by popularity is applied
//! by the store query.

use std::collections::{BTreeMap, BTreeSet};

use crate::entities::{Product, ProductId, TagSet};

/// Read-only view of the catalog, keyed by tag.
pub trait ProductIndex {
    /// Ids of all live products carrying `tag`.
    fn products_with_tag(&self, tag: &str) -> Vec<ProductId>;
}

/// Inverted `tag -> products` index over a catalog snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagIndex {
    by_tag: BTreeMap<String, BTreeSet<ProductId>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from product rows.
    pub fn from_products<'a, I>(products: I) -> Self
    where
        I: IntoIterator<Item = &'a Product>,
    {
        let mut index = Self::new();
        for product in products {
            index.insert(product.id, &product.tags);
        }
        index
    }

    pub fn insert(&mut self, id: ProductId, tags: &TagSet) {
        for tag in tags {
            self.by_tag.entry(tag.clone()).or_default().insert(id);
        }
    }

    /// Drop a product from every tag bucket, pruning empty buckets.
    pub fn remove(&mut self, id: ProductId) {
        self.by_tag.retain(|_, ids| {
            ids.remove(&id);
            !ids.is_empty()
        });
    }

    pub fn tag_count(&self) -> usize {
        self.by_tag.len()
    }
}

impl ProductIndex for TagIndex {
    fn products_with_tag(&self, tag: &str) -> Vec<ProductId> {
        self.by_tag
            .get(tag)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl ProductIndex for [Product] {
    fn products_with_tag(&self, tag: &str) -> Vec<ProductId> {
        self.iter()
            .filter(|p| p.has_tag(tag))
            .map(|p| p.id)
            .collect()
    }
}

/// Union of products carrying any of `interests`. Duplicates collapse in the set.
pub fn compute_candidates<I>(interests: &TagSet, catalog: &I) -> BTreeSet<ProductId>
where
    I: ProductIndex + ?Sized,
{
    interests
        .iter()
        .flat_map(|tag| catalog.products_with_tag(tag))
        .collect()
}

/// Per-user predicate used by the product fan-out: `interests ∩ tags ≠ ∅`.
pub fn interests_match(interests: &TagSet, tags: &TagSet) -> bool {
    // Iterate the smaller set.
    let (small, large) = if interests.len() <= tags.len() {
        (interests, tags)
    } else {
        (tags, interests)
    };
    small.iter().any(|tag| large.contains(tag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::tag_set;

    fn catalog() -> Vec<Product> {
        vec![
            Product::new(ProductId(1), tag_set(["music", "vinyl"])),
            Product::new(ProductId(2), tag_set(["tech"])),
            Product::new(ProductId(3), tag_set(["music", "tech"])),
            Product::new(ProductId(4), tag_set(["Music"])),
        ]
    }

    #[test]
    fn test_union_across_interests() {
        let index = TagIndex::from_products(&catalog());
        let got = compute_candidates(&tag_set(["vinyl", "tech"]), &index);
        let expected: BTreeSet<ProductId> = [1, 2, 3].into_iter().map(ProductId).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_case_sensitive() {
        let index = TagIndex::from_products(&catalog());
        let got = compute_candidates(&tag_set(["Music"]), &index);
        assert_eq!(got, BTreeSet::from([ProductId(4)]));
    }

    #[test]
    fn test_no_interests_no_candidates() {
        let index = TagIndex::from_products(&catalog());
        assert!(compute_candidates(&TagSet::new(), &index).is_empty());
    }

    #[test]
    fn test_slice_index_agrees_with_tag_index() {
        let products = catalog();
        let index = TagIndex::from_products(&products);
        let interests = tag_set(["music"]);
        assert_eq!(
            compute_candidates(&interests, products.as_slice()),
            compute_candidates(&interests, &index)
        );
    }

    #[test]
    fn test_remove_prunes_buckets() {
        let mut index = TagIndex::from_products(&catalog());
        index.remove(ProductId(2));
        index.remove(ProductId(3));
        assert!(index.products_with_tag("tech").is_empty());
        assert_eq!(index.products_with_tag("music"), vec![ProductId(1)]);
    }

    #[test]
    fn test_interests_match() {
        assert!(interests_match(&tag_set(["a", "b"]), &tag_set(["b"])));
        assert!(!interests_match(&tag_set(["a"]), &tag_set(["A"])));
        assert!(!interests_match(&TagSet::new(), &tag_set(["a"])));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_tags() -> impl Strategy<Value = TagSet> {
        prop::collection::btree_set("[a-d]", 0..4)
    }

    fn arb_catalog() -> impl Strategy<Value = Vec<Product>> {
        prop::collection::vec(arb_tags(), 0..12).prop_map(|tag_sets| {
            tag_sets
                .into_iter()
                .enumerate()
                .map(|(i, tags)| Product::new(ProductId(i as i64), tags))
                .collect()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Candidates are exactly the products whose tags intersect the interests.
        #[test]
        fn prop_candidates_are_intersection(catalog in arb_catalog(), interests in arb_tags()) {
            let index = TagIndex::from_products(&catalog);
            let got = compute_candidates(&interests, &index);
            let expected: BTreeSet<ProductId> = catalog
                .iter()
                .filter(|p| interests_match(&interests, &p.tags))
                .map(|p| p.id)
                .collect();
            prop_assert_eq!(got, expected);
        }

        #[test]
        fn prop_interests_match_is_symmetric(a in arb_tags(), b in arb_tags()) {
            prop_assert_eq!(interests_match(&a, &b), interests_match(&b, &a));
        }
    }
}
