/// Swap the two bytes of every 16-bit halfword in `buf`, in place.
///
/// The PS3 ATA controller stores sector data byte-swapped, so this runs
/// between the raw medium and the first cipher layer in both directions.
/// A trailing odd byte is left untouched.
pub fn swap_halfwords(buf: &mut [u8]) {
    for pair in buf.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}
