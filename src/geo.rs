//! Geographic bucketing
//!
//! Peers that resolve to nearby coordinates must render as one map point, so
//! the aggregator keys its merge on a fixed-precision geohash of the resolved
//! latitude/longitude rather than on the raw peer identity. Standard geohash
//! encoding: interleaved binary subdivision of the lon/lat ranges, base-32
//! alphabet.

/// Geohash base-32 alphabet (omits a, i, l, o)
const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Encode a coordinate pair as a geohash of the given character length
///
/// Each character encodes 5 bits, alternating longitude/latitude subdivision
/// starting with longitude. Inputs outside the valid ranges are clamped.
pub fn encode(lat: f64, lon: f64, precision: usize) -> String {
    let lat = lat.clamp(-90.0, 90.0);
    let lon = lon.clamp(-180.0, 180.0);

    let mut lat_range = (-90.0f64, 90.0f64);
    let mut lon_range = (-180.0f64, 180.0f64);

    let mut hash = String::with_capacity(precision);
    let mut bits = 0u8;
    let mut bit_count = 0u8;
    let mut even_bit = true; // true = longitude bit next

    while hash.len() < precision {
        if even_bit {
            let mid = (lon_range.0 + lon_range.1) / 2.0;
            if lon >= mid {
                bits = (bits << 1) | 1;
                lon_range.0 = mid;
            } else {
                bits <<= 1;
                lon_range.1 = mid;
            }
        } else {
            let mid = (lat_range.0 + lat_range.1) / 2.0;
            if lat >= mid {
                bits = (bits << 1) | 1;
                lat_range.0 = mid;
            } else {
                bits <<= 1;
                lat_range.1 = mid;
            }
        }
        even_bit = !even_bit;

        bit_count += 1;
        if bit_count == 5 {
            hash.push(BASE32[bits as usize] as char);
            bits = 0;
            bit_count = 0;
        }
    }

    hash
}
