use crate::device::constants::{BATTERY_FRAME_LEN, TELEMETRY_FRAME_LEN};
use crate::device::types::TrainingDataItem;
use crate::error::DecodeError;

fn read_i16_le(data: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([data[offset], data[offset + 1]])
}

fn check_len(data: &[u8], expected: usize) -> Result<(), DecodeError> {
    if data.len() < expected {
        return Err(DecodeError::FrameTooShort { expected, actual: data.len() });
    }
    Ok(())
}

/// Decodes one telemetry frame. Bytes past the first eight are ignored and values are passed
/// through as the sensor reported them.
pub fn decode_training_data(data: &[u8], elapsed_seconds: f64) -> Result<TrainingDataItem, DecodeError> {
    check_len(data, TELEMETRY_FRAME_LEN)?;

    Ok(TrainingDataItem {
        pressure: read_i16_le(data, 0),
        gyro_x: read_i16_le(data, 2),
        gyro_y: read_i16_le(data, 4),
        gyro_z: read_i16_le(data, 6),
        elapsed_seconds,
    })
}

pub fn decode_battery_millivolts(data: &[u8]) -> Result<i16, DecodeError> {
    check_len(data, BATTERY_FRAME_LEN)?;
    Ok(read_i16_le(data, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_fields_in_order() {
        let frame = [10, 0, 0xFB, 0xFF, 0, 0, 3, 0];
        let item = decode_training_data(&frame, 0.0).unwrap();

        assert_eq!(item.pressure, 10);
        assert_eq!(item.gyro_x, -5);
        assert_eq!(item.gyro_y, 0);
        assert_eq!(item.gyro_z, 3);
        assert_eq!(item.elapsed_seconds, 0.0);
    }

    #[test]
    fn high_byte_is_second() {
        let frame = [0x05, 0xFF, 0x00, 0x80, 0xFF, 0x7F, 0xFF, 0xFF];
        let item = decode_training_data(&frame, 1.5).unwrap();

        assert_eq!(item.pressure, -251);
        assert_eq!(item.gyro_x, i16::MIN);
        assert_eq!(item.gyro_y, i16::MAX);
        assert_eq!(item.gyro_z, -1);
        assert_eq!(item.elapsed_seconds, 1.5);
    }

    #[test]
    fn trailing_bytes_do_not_matter() {
        let frame = [1, 2, 3, 4, 5, 6, 7, 8];
        let expected = decode_training_data(&frame, 0.25).unwrap();

        for extra in [vec![0u8], vec![0xFF; 4], (0..=255).collect::<Vec<u8>>()] {
            let mut longer = frame.to_vec();
            longer.extend_from_slice(&extra);
            assert_eq!(decode_training_data(&longer, 0.25).unwrap(), expected);
        }
    }

    #[test]
    fn short_frames_are_rejected() {
        for len in 0..TELEMETRY_FRAME_LEN {
            let frame = vec![0xAA; len];
            assert_eq!(
                decode_training_data(&frame, 0.0),
                Err(DecodeError::FrameTooShort { expected: 8, actual: len })
            );
        }
    }

    #[test]
    fn battery_frame() {
        assert_eq!(decode_battery_millivolts(&3700i16.to_le_bytes()), Ok(3700));
        assert_eq!(decode_battery_millivolts(&[0x74, 0x0E, 0x99]), Ok(3700));
        assert_eq!(
            decode_battery_millivolts(&[0x74]),
            Err(DecodeError::FrameTooShort { expected: 2, actual: 1 })
        );
    }
}
