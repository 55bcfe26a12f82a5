// Copyright (c) 2025 vivo Mobile Communication Co., Ltd.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//       http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! An intrusive, ordered-by-key skiplist, keyed on timer deadlines.
//!
//! No file in the teacher repository implements a skiplist — this is ported
//! directly from `original_source/libgo/routine_sync/linked_skiplist.h`'s
//! algorithm (same branching factor, same max height, same per-thread
//! random height generator), re-expressed as owned-by-caller intrusive
//! nodes in the style `blue_infra`'s intrusive lists use (`NonNull` links,
//! caller proves non-aliasing via the timer's mutex). Unlike the original,
//! a node's "previous at level i" is represented as `None` meaning "the
//! head", rather than a sentinel `Node` that also has to carry a `K`/`V` it
//! never uses — `Head` and `Node` are distinct types here.
//!
//! Two bugs in the original are not reproduced: `lower_bound` there compares
//! a `value` that is never defined (it should compare keys throughout), and
//! `find` references an out-of-scope `node` variable. Both read as
//! transcription slips in the header rather than intentional behavior, so
//! this port just implements binary-search-down-the-levels correctly.

use core::cell::Cell;
use core::ptr::NonNull;

pub(crate) const MAX_HEIGHT: usize = 12;
const BRANCHING_FACTOR: u32 = 4;

struct Level<K, V> {
    prev: Option<NonNull<Node<K, V>>>,
    next: Option<NonNull<Node<K, V>>>,
}

impl<K, V> Clone for Level<K, V> {
    fn clone(&self) -> Self {
        Level {
            prev: self.prev,
            next: self.next,
        }
    }
}
impl<K, V> Copy for Level<K, V> {}

/// One entry in the skiplist. Embedded in the caller's own struct (a timer
/// entry, in this crate's only user) and linked in with a raw pointer to
/// that embedding — never boxed or owned by the list itself.
pub(crate) struct Node<K, V> {
    links: [Level<K, V>; MAX_HEIGHT],
    height: u8,
    pub(crate) key: K,
    pub(crate) value: V,
}

impl<K, V> Node<K, V> {
    pub(crate) fn new(key: K, value: V) -> Self {
        Node {
            links: [Level { prev: None, next: None }; MAX_HEIGHT],
            height: 0,
            key,
            value,
        }
    }

    #[inline]
    pub(crate) fn is_linked(&self) -> bool {
        self.height > 0
    }
}

struct Head<K, V> {
    next: [Option<NonNull<Node<K, V>>>; MAX_HEIGHT],
    height: u8,
}

/// An intrusive multimap ordered by `K`, duplicate keys allowed.
pub(crate) struct SkipList<K, V> {
    head: Head<K, V>,
    scaled_inverse_branching: u32,
}

const RNG_M: u32 = 2_147_483_647;
const RNG_A: u64 = 16807;

thread_local! {
    static RNG_SEED: Cell<u32> = Cell::new(good_seed(thread_rand_seed()));
}

fn thread_rand_seed() -> u32 {
    use core::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    crate::compat::thread::current().id().hash(&mut hasher);
    hasher.finish() as u32
}

fn good_seed(s: u32) -> u32 {
    let masked = s & RNG_M;
    if masked != 0 {
        masked
    } else {
        1
    }
}

/// Park-Miller minimal-standard generator, same constants as the original's
/// `Random` helper.
fn next_rand() -> u32 {
    RNG_SEED.with(|seed| {
        let product = seed.get() as u64 * RNG_A;
        let mut next = ((product >> 31) + (product & RNG_M as u64)) as u32;
        if next > RNG_M {
            next -= RNG_M;
        }
        seed.set(next);
        next
    })
}

fn random_height() -> u8 {
    let scaled = (RNG_M as u64 + 1) / BRANCHING_FACTOR as u64;
    let mut height: u8 = 1;
    while (height as usize) < MAX_HEIGHT && (next_rand() as u64) < scaled {
        height += 1;
    }
    height
}

impl<K: Ord + Copy, V> SkipList<K, V> {
    pub(crate) fn new() -> Self {
        SkipList {
            head: Head {
                next: [None; MAX_HEIGHT],
                height: 1,
            },
            scaled_inverse_branching: (RNG_M + 1) / BRANCHING_FACTOR,
        }
    }

    /// Builds a node's random height. Does not touch the list, so callers
    /// may do this before taking the list's lock (matches the original's
    /// `buildNode`, called outside the container lock).
    pub(crate) fn prepare_height(node: &mut Node<K, V>) {
        if node.height == 0 {
            node.height = random_height();
        }
    }

    /// Finds, for each level, the node immediately before where `key` would
    /// be inserted. `None` at a given level means "the head".
    fn locate(&self, key: K) -> [Option<NonNull<Node<K, V>>>; MAX_HEIGHT] {
        let mut prevs: [Option<NonNull<Node<K, V>>>; MAX_HEIGHT] = [None; MAX_HEIGHT];
        let mut last: Option<NonNull<Node<K, V>>> = None;
        for level in (0..self.head.height as usize).rev() {
            loop {
                let next = match last {
                    None => self.head.next[level],
                    Some(n) => unsafe { n.as_ref().links[level].next },
                };
                match next {
                    Some(n) if unsafe { n.as_ref().key } < key => {
                        last = Some(n);
                    }
                    _ => break,
                }
            }
            prevs[level] = last;
        }
        prevs
    }

    /// Inserts `node`, building its height first if `prepare_height` was not
    /// already called.
    ///
    /// # Safety
    /// `node` must outlive its presence in the list and must not already be
    /// linked into this or any other list.
    pub(crate) unsafe fn insert(&mut self, mut node: NonNull<Node<K, V>>) {
        let key = node.as_ref().key;
        let prevs = self.locate(key);
        Self::prepare_height(node.as_mut());
        let height = node.as_ref().height;

        if self.head.height < height {
            self.head.height = height;
        }

        for level in 0..height as usize {
            let prev = prevs[level];
            let next = match prev {
                None => self.head.next[level],
                Some(p) => p.as_ref().links[level].next,
            };

            node.as_mut().links[level].next = next;
            node.as_mut().links[level].prev = prev;
            if let Some(mut next) = next {
                next.as_mut().links[level].prev = Some(node);
            }
            match prev {
                None => self.head.next[level] = Some(node),
                Some(mut p) => p.as_mut().links[level].next = Some(node),
            }
        }
    }

    pub(crate) fn front(&self) -> Option<NonNull<Node<K, V>>> {
        self.head.next[0]
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.front().is_none()
    }

    /// Unlinks `node` at every level it participates in. If `clear_height`
    /// is false the node's height (and thus its link array) is left intact
    /// so it can be reinserted without rerolling its height — used by
    /// `Timer::reschedule`.
    ///
    /// # Safety
    /// `node` must currently be linked into this exact list, or already
    /// unlinked (in which case this is a no-op).
    pub(crate) unsafe fn erase(&mut self, mut node: NonNull<Node<K, V>>, clear_height: bool) -> bool {
        let height = node.as_ref().height;
        let mut unlinked = false;
        for level in 0..height as usize {
            let lvl = node.as_ref().links[level];
            match lvl.prev {
                None => self.head.next[level] = lvl.next,
                Some(mut prev) => prev.as_mut().links[level].next = lvl.next,
            }
            if let Some(mut next) = lvl.next {
                next.as_mut().links[level].prev = lvl.prev;
            }
            node.as_mut().links[level] = Level { prev: None, next: None };
            unlinked = true;
        }
        if clear_height {
            node.as_mut().height = 0;
        }
        unlinked
    }
}
