//! Basic usage of the `segmented_pool` crate:
//!
//! * Creating a pool.
//! * Allocating items.
//! * Accessing items.
//! * Deallocating items and seeing their slots reused.

use segmented_pool::{Poolable, RecycledFlag, SegmentedPool};

struct Message {
    topic: &'static str,
    body: String,
    recycled: RecycledFlag,
}

impl From<(&'static str, &str)> for Message {
    fn from((topic, body): (&'static str, &str)) -> Self {
        Self {
            topic,
            body: body.to_string(),
            recycled: RecycledFlag::new(),
        }
    }
}

impl Poolable for Message {
    fn reset(&mut self) {
        self.body.clear();
    }

    fn is_recycled(&self) -> bool {
        self.recycled.get()
    }

    fn set_recycled(&mut self, recycled: bool) {
        self.recycled.set(recycled);
    }
}

fn main() {
    let mut pool = SegmentedPool::<Message>::new();

    println!(
        "Pool for {}-byte slots, segments grow in steps of {} pages of {} bytes",
        pool.slot_size(),
        pool.base_segment_pages(),
        pool.page_size()
    );

    // Allocating an item gives you a handle that you can later use to access it.
    let greeting = pool.allocate_from(("greetings", "Hello"));
    let farewell = pool.allocate_from(("farewells", "Goodbye"));

    if let Some(message) = pool.get(greeting) {
        println!("[{}] {}", message.topic, message.body);
    }

    // Items can be modified in place.
    if let Some(message) = pool.get_mut(farewell) {
        message.body.push_str(", and thanks for all the fish");
    }

    if let Some(message) = pool.get(farewell) {
        println!("[{}] {}", message.topic, message.body);
    }

    println!(
        "{} live items in {} segment(s) with room for {}",
        pool.live(),
        pool.segment_count(),
        pool.total_capacity()
    );

    pool.deallocate(greeting);

    // The handle of a deallocated item no longer resolves, even once its slot is reused.
    let reused = pool.allocate_from(("greetings", "Hello again"));
    assert_eq!(reused.slot_index(), greeting.slot_index());
    assert!(pool.get(greeting).is_none());

    println!("Slot {} was reused for a new message", reused.slot_index());

    pool.deallocate(reused);
    pool.deallocate(farewell);

    for segment in pool.segments() {
        println!(
            "Segment of {} pages holds {} items, {} ever used",
            segment.pages(),
            segment.capacity(),
            segment.high_water_mark()
        );
    }
}
