//! Property tests for the pagination engine.

use panelforge::layout::{layout, GridSize, PaginationConfig, PaginationStrategy};
use panelforge::Slot;
use proptest::prelude::*;

fn arbitrary_config() -> impl Strategy<Value = PaginationConfig> {
    (
        prop_oneof![
            Just(PaginationStrategy::FixedSlots),
            Just(PaginationStrategy::DeclarativeRows),
            Just(PaginationStrategy::Hybrid),
        ],
        -10i32..100,
        0u16..27,
    )
        .prop_map(|(strategy, items_per_page, fixed_count)| {
            let mut config = match strategy {
                PaginationStrategy::FixedSlots => {
                    PaginationConfig::fixed((0..fixed_count).map(Slot).collect())
                }
                PaginationStrategy::DeclarativeRows => PaginationConfig::declarative(vec![
                    "#########".to_string(),
                    "#########".to_string(),
                    "<===.===>".to_string(),
                ]),
                PaginationStrategy::Hybrid => PaginationConfig::hybrid(
                    vec![String::new(), String::new(), "<===.===>".to_string()],
                    items_per_page,
                ),
            };
            config.items_per_page = items_per_page;
            config
        })
}

proptest! {
    // Any combination of page request, item count, and configuration
    // yields a page inside [1, total_pages] and never panics.
    #[test]
    fn page_always_clamps_into_range(
        config in arbitrary_config(),
        requested in 0u32..1_000_000,
        item_count in 0usize..100_000,
    ) {
        let page = layout(&config, GridSize::new(3, 9), requested, item_count);
        prop_assert!(page.total_pages >= 1);
        prop_assert!(page.current_page >= 1);
        prop_assert!(page.current_page <= page.total_pages);
    }

    // Every item index mapped onto the page is a real item, and the
    // mapping is dense from the page's first item.
    #[test]
    fn mapped_items_are_in_bounds(
        requested in 0u32..10_000,
        item_count in 0usize..10_000,
    ) {
        let config = PaginationConfig::fixed((0..10).map(Slot).collect());
        let page = layout(&config, GridSize::new(2, 9), requested, item_count);
        for item in page.slot_items.values() {
            prop_assert!(*item < item_count);
        }
    }
}
