// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2021 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! `HashMap`/`HashSet` aliases using a faster, non-DoS-resistant hasher.
//!
//! Nothing here is ever keyed on attacker-controlled input directly, so the
//! speed of `ahash` is worth more than `RandomState`'s DoS resistance.

pub type FastHashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;
pub type FastHashSet<K> = std::collections::HashSet<K, ahash::RandomState>;
