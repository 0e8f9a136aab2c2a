use crate::codec::CodecError;

/// First byte of every game frame.
pub const FRAME_MARKER: u8 = 0xfe;

/// Checks the marker and returns the rest of the frame.
pub fn strip_marker(frame: &[u8]) -> Result<&[u8], CodecError> {
    match frame.split_first() {
        Some((&FRAME_MARKER, rest)) => Ok(rest),
        Some((&other, _)) => Err(CodecError::FrameMarker(other)),
        None => Err(CodecError::EmptyFrame),
    }
}

/// Starts an outbound frame with room for `capacity` payload bytes.
pub fn start_frame(capacity: usize) -> Vec<u8> {
    let mut frame = Vec::with_capacity(capacity + 1);
    frame.push(FRAME_MARKER);
    frame
}
