// Copyright © 2021 strogg developers
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Time conversion helpers shared by the client and renderer.
//!
//! All engine-visible times are `chrono::Duration`s measured from client
//! start; they cross into shader land as `f32` seconds.

use cgmath::{Deg, Vector3};
use chrono::Duration;

// i64 microseconds covers ~292,000 years, so the unwrap cannot fire for any
// time the engine can represent
#[inline]
pub fn duration_to_f32(d: Duration) -> f32 {
    d.num_microseconds().unwrap() as f32 / 1_000_000.0
}

#[inline]
pub fn duration_from_f32(f: f32) -> Duration {
    Duration::microseconds((f * 1_000_000.0) as i64)
}

#[inline]
pub fn duration_to_millis_f32(d: Duration) -> f32 {
    d.num_microseconds().unwrap() as f32 / 1_000.0
}

#[inline]
pub fn deg_vector_to_f32_vector(av: Vector3<Deg<f32>>) -> Vector3<f32> {
    Vector3::new(av[0].0, av[1].0, av[2].0)
}

#[inline]
pub fn deg_vector_from_f32_vector(v: Vector3<f32>) -> Vector3<Deg<f32>> {
    Vector3::new(Deg(v[0]), Deg(v[1]), Deg(v[2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_round_trip() {
        let d = Duration::milliseconds(1500);
        assert_eq!(duration_to_f32(d), 1.5);
        assert_eq!(duration_from_f32(1.5), d);
    }
}
