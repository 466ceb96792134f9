//! Deterministic state streams.
//!
//! `save_state` serializes every physics-visible quantity in a canonical
//! order; `restore_state` reads it back; validate mode replays a saved
//! stream against the live state and panics at the first diverging byte with
//! its stream position. Byte equality of two saved streams is the
//! determinism contract.

use glam::{Quat, Vec3};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Save,
    Restore,
    Validate,
}

pub struct StateRecorder {
    mode: Mode,
    buffer: Vec<u8>,
    cursor: usize,
}

impl StateRecorder {
    /// Recorder that captures state into a fresh stream.
    pub fn new() -> Self {
        Self {
            mode: Mode::Save,
            buffer: Vec::new(),
            cursor: 0,
        }
    }

    /// Recorder that restores state from a previously saved stream.
    pub fn for_restore(data: Vec<u8>) -> Self {
        Self {
            mode: Mode::Restore,
            buffer: data,
            cursor: 0,
        }
    }

    /// Recorder that compares the live state against a saved stream.
    pub fn for_validate(data: Vec<u8>) -> Self {
        Self {
            mode: Mode::Validate,
            buffer: data,
            cursor: 0,
        }
    }

    pub fn is_restoring(&self) -> bool {
        self.mode == Mode::Restore
    }

    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_data(self) -> Vec<u8> {
        self.buffer
    }

    fn sync_bytes(&mut self, value: &mut [u8]) {
        match self.mode {
            Mode::Save => {
                self.buffer.extend_from_slice(value);
                self.cursor = self.buffer.len();
            }
            Mode::Restore => {
                let end = self.cursor + value.len();
                assert!(end <= self.buffer.len(), "state stream ended early at byte {}", self.cursor);
                value.copy_from_slice(&self.buffer[self.cursor..end]);
                self.cursor = end;
            }
            Mode::Validate => {
                let end = self.cursor + value.len();
                assert!(end <= self.buffer.len(), "state stream ended early at byte {}", self.cursor);
                let expected = &self.buffer[self.cursor..end];
                if expected != value {
                    let offset = expected
                        .iter()
                        .zip(value.iter())
                        .position(|(a, b)| a != b)
                        .unwrap_or(0);
                    panic!(
                        "state validation mismatch at stream byte {} (expected {:?}, found {:?})",
                        self.cursor + offset,
                        expected[offset],
                        value[offset]
                    );
                }
                self.cursor = end;
            }
        }
    }

    pub fn sync_u8(&mut self, value: &mut u8) {
        let mut bytes = [*value];
        self.sync_bytes(&mut bytes);
        *value = bytes[0];
    }

    pub fn sync_bool(&mut self, value: &mut bool) {
        let mut byte = *value as u8;
        self.sync_u8(&mut byte);
        *value = byte != 0;
    }

    pub fn sync_u32(&mut self, value: &mut u32) {
        let mut bytes = value.to_le_bytes();
        self.sync_bytes(&mut bytes);
        *value = u32::from_le_bytes(bytes);
    }

    pub fn sync_u64(&mut self, value: &mut u64) {
        let mut bytes = value.to_le_bytes();
        self.sync_bytes(&mut bytes);
        *value = u64::from_le_bytes(bytes);
    }

    pub fn sync_f32(&mut self, value: &mut f32) {
        let mut bits = value.to_bits();
        self.sync_u32(&mut bits);
        *value = f32::from_bits(bits);
    }

    pub fn sync_vec3(&mut self, value: &mut Vec3) {
        self.sync_f32(&mut value.x);
        self.sync_f32(&mut value.y);
        self.sync_f32(&mut value.z);
    }

    pub fn sync_quat(&mut self, value: &mut Quat) {
        let mut array = value.to_array();
        for component in &mut array {
            self.sync_f32(component);
        }
        *value = Quat::from_array(array);
    }
}

impl Default for StateRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_restore_round_trip() {
        let mut recorder = StateRecorder::new();
        let mut position = Vec3::new(1.0, -2.5, 3.25);
        let mut rotation = Quat::from_rotation_y(0.3);
        let mut count = 42u32;
        recorder.sync_vec3(&mut position);
        recorder.sync_quat(&mut rotation);
        recorder.sync_u32(&mut count);

        let mut restore = StateRecorder::for_restore(recorder.into_data());
        let mut position2 = Vec3::ZERO;
        let mut rotation2 = Quat::IDENTITY;
        let mut count2 = 0u32;
        restore.sync_vec3(&mut position2);
        restore.sync_quat(&mut rotation2);
        restore.sync_u32(&mut count2);

        assert_eq!(position, position2);
        assert_eq!(rotation, rotation2);
        assert_eq!(count, count2);
    }

    #[test]
    fn identical_state_validates_clean() {
        let mut recorder = StateRecorder::new();
        let mut value = 7.25f32;
        recorder.sync_f32(&mut value);

        let mut validate = StateRecorder::for_validate(recorder.into_data());
        let mut same = 7.25f32;
        validate.sync_f32(&mut same);
    }

    #[test]
    #[should_panic(expected = "state validation mismatch")]
    fn diverging_state_panics_with_position() {
        let mut recorder = StateRecorder::new();
        let mut value = 7.25f32;
        recorder.sync_f32(&mut value);

        let mut validate = StateRecorder::for_validate(recorder.into_data());
        let mut different = 8.5f32;
        validate.sync_f32(&mut different);
    }
}
