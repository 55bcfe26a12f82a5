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

//! `std`/`loom` compatibility shim.
//!
//! Every primitive the rutex layer touches — atomics, `Mutex`, `Condvar`,
//! `thread::spawn` — is imported from here rather than straight from `std`.
//! Under `--cfg loom` this resolves to loom's model-checked stand-ins so the
//! `tests/loom_*.rs` suite can explore interleavings; otherwise it is a
//! transparent re-export of `std`.

cfg_if::cfg_if! {
    if #[cfg(loom)] {
        pub(crate) use loom::sync::atomic;
        pub(crate) use loom::sync::{Condvar, Mutex, MutexGuard};
        pub(crate) use loom::thread;
    } else {
        pub(crate) use std::sync::atomic;
        pub(crate) use std::sync::{Condvar, Mutex, MutexGuard};
        pub(crate) use std::thread;
    }
}
