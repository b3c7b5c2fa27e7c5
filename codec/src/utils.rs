// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

/// Generate a short random alphanumeric string, used for peer ids and
/// request correlation ids.
pub fn random_string(len: usize) -> String {
    thread_rng().sample_iter(&Alphanumeric).take(len).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_string_len() {
        assert_eq!(random_string(8).len(), 8);
        assert_eq!(random_string(0).len(), 0);
    }

    #[test]
    fn test_random_string_alphanumeric() {
        let s = random_string(32);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
