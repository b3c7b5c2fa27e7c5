// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! All user handlers may be synchronous or deferred; the core treats
//! their return values uniformly via this "lift to future" alias instead
//! of branching on whether a handler happened to return a bare value or a
//! future.

use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Lifts an already-available value into a future, for handlers that are
/// plain synchronous closures.
pub fn ready<T: Send + 'static>(value: T) -> BoxFuture<'static, T> {
    Box::pin(std::future::ready(value))
}
