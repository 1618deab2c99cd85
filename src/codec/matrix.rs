//! The 9x9 LED matrix and its wire encoding.

pub const MATRIX_COLUMNS: usize = 9;
pub const MATRIX_LED_COUNT: usize = MATRIX_COLUMNS * MATRIX_COLUMNS;

/// Length of an encoded matrix command: 11 bytes of LED bits, brightness and display interval.
pub const ENCODED_MATRIX_LENGTH: usize = 13;

const LED_BYTES: usize = (MATRIX_LED_COUNT + 7) / 8;
const FADE_TRANSITION_BIT: u8 = 1 << 4;

const LED_OFF_CHARACTERS: [char; 2] = [' ', '0'];

/// 81 LEDs in row-major order, `true` meaning lit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedMatrix {
    leds: [bool; MATRIX_LED_COUNT],
}

impl LedMatrix {
    /// Panics unless `leds` has exactly 81 elements; a wrongly sized matrix is never truncated or padded.
    pub fn from_leds(leds: &[bool]) -> Self {
        assert_eq!(
            leds.len(),
            MATRIX_LED_COUNT,
            "an LED matrix must have exactly {} LEDs",
            MATRIX_LED_COUNT
        );

        let mut matrix = LedMatrix::empty();
        matrix.leds.copy_from_slice(leds);
        matrix
    }

    /// Builds a matrix from text art: spaces and '0' are off, any other character is on.
    /// The text is cut off after 81 characters and filled up with unlit LEDs.
    pub fn from_pattern(pattern: &str) -> Self {
        let mut matrix = LedMatrix::empty();
        for (led, c) in matrix.leds.iter_mut().zip(pattern.chars()) {
            *led = !LED_OFF_CHARACTERS.contains(&c);
        }
        matrix
    }

    pub fn empty() -> Self {
        LedMatrix { leds: [false; MATRIX_LED_COUNT] }
    }

    /// A centered bar that grows from the bottom row up; `progress` in [0, 1].
    pub fn progress_vertical_bar(progress: f64) -> Self {
        let pattern: String = (0..MATRIX_COLUMNS)
            .rev()
            .map(|row| {
                if progress > row as f64 / MATRIX_COLUMNS as f64 {
                    "   ...   "
                } else {
                    "         "
                }
            })
            .collect();
        LedMatrix::from_pattern(&pattern)
    }

    /// A right-aligned staircase that is revealed from the left; `progress` in [0, 1].
    pub fn progress_volume_bar(progress: f64) -> Self {
        let width = (progress.clamp(0.0, 1.0) * MATRIX_COLUMNS as f64).ceil() as usize;
        let pattern: String = (0..MATRIX_COLUMNS)
            .map(|row| {
                let full_row = " ".repeat(MATRIX_COLUMNS - (row + 1)) + &".".repeat(row + 1);
                let visible: String = full_row.chars().take(width).collect();
                format!("{:<width$}", visible, width = MATRIX_COLUMNS)
            })
            .collect();
        LedMatrix::from_pattern(&pattern)
    }

    pub fn leds(&self) -> &[bool] {
        &self.leds
    }

    pub fn is_on(&self, row: usize, column: usize) -> bool {
        self.leds[row * MATRIX_COLUMNS + column]
    }

    /// Predefined matrices by name, as accepted on the command line.
    pub fn named(name: &str) -> Option<LedMatrix> {
        let pattern = match name {
            "empty" => return Some(LedMatrix::empty()),
            "play" => PLAY,
            "pause" => PAUSE,
            "next" => NEXT,
            "previous" => PREVIOUS,
            "question-mark" => QUESTION_MARK,
            "bluetooth" => BLUETOOTH,
            _ => return None,
        };
        Some(LedMatrix::from_pattern(pattern))
    }
}

impl Default for LedMatrix {
    fn default() -> Self {
        LedMatrix::empty()
    }
}

pub const MATRIX_NAMES: [&str; 7] = ["empty", "play", "pause", "next", "previous", "question-mark", "bluetooth"];

const PLAY: &str = concat!(
    "         ",
    "   .     ",
    "   ..    ",
    "   ...   ",
    "   ....  ",
    "   ...   ",
    "   ..    ",
    "   .     ",
    "         ",
);

const PAUSE: &str = concat!(
    "         ",
    "  .. ..  ",
    "  .. ..  ",
    "  .. ..  ",
    "  .. ..  ",
    "  .. ..  ",
    "  .. ..  ",
    "  .. ..  ",
    "         ",
);

const NEXT: &str = concat!(
    "         ",
    "         ",
    "   .  .  ",
    "   .. .  ",
    "   ....  ",
    "   .. .  ",
    "   .  .  ",
    "         ",
    "         ",
);

const PREVIOUS: &str = concat!(
    "         ",
    "         ",
    "  .  .   ",
    "  . ..   ",
    "  ....   ",
    "  . ..   ",
    "  .  .   ",
    "         ",
    "         ",
);

const QUESTION_MARK: &str = concat!(
    "   ...   ",
    "  .   .  ",
    " .     . ",
    "      .  ",
    "     .   ",
    "    .    ",
    "    .    ",
    "         ",
    "    .    ",
);

const BLUETOOTH: &str = concat!(
    "    *    ",
    "    **   ",
    "  * * *  ",
    "   ***   ",
    "    *    ",
    "   ***   ",
    "  * * *  ",
    "    **   ",
    "    *    ",
);

/**
 * Encodes a matrix display command.
 *
 * ```text
 * [0-10] : LED bits, 8 LEDs per byte, first LED in the least significant bit
 *          bit 4 of byte 10 (beyond the 81st LED) requests a fade transition
 * [11]   : brightness, [0, 1] scaled to [0, 255]
 * [12]   : display interval in tenths of a second, saturating at 255 (0 = indefinitely)
 * ```
 */
pub fn encode_matrix(matrix: &LedMatrix, brightness: f32, display_interval_seconds: f64, fade_transition: bool) -> [u8; ENCODED_MATRIX_LENGTH] {
    let mut bytes = [0u8; ENCODED_MATRIX_LENGTH];

    for (index, led) in matrix.leds.iter().enumerate() {
        if *led {
            bytes[index / 8] |= 1 << (index % 8);
        }
    }

    if fade_transition {
        bytes[LED_BYTES - 1] |= FADE_TRANSITION_BIT;
    }

    bytes[LED_BYTES] = (brightness.clamp(0.0, 1.0) * 255.0).round() as u8;
    bytes[LED_BYTES + 1] = (display_interval_seconds * 10.0).round().clamp(0.0, 255.0) as u8;
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_empty_matrix() {
        let bytes = encode_matrix(&LedMatrix::empty(), 1.0, 2.0, false);
        assert_eq!(bytes.len(), 13);
        assert_eq!(&bytes[..11], &[0u8; 11]);
        assert_eq!(bytes[11], 255);
        assert_eq!(bytes[12], 20);
    }

    #[test]
    fn test_encode_bits_lsb_first() {
        let mut leds = [false; MATRIX_LED_COUNT];
        leds[0] = true;
        leds[9] = true;
        leds[80] = true;
        let bytes = encode_matrix(&LedMatrix::from_leds(&leds), 0.0, 0.0, false);
        assert_eq!(bytes[0], 0b0000_0001);
        assert_eq!(bytes[1], 0b0000_0010);
        assert_eq!(bytes[10], 0b0000_0001);
        assert_eq!(bytes[11], 0);
        assert_eq!(bytes[12], 0);
    }

    #[test]
    fn test_encode_fade_brightness_interval() {
        let bytes = encode_matrix(&LedMatrix::empty(), 0.5, 30.0, true);
        assert_eq!(bytes[10], 0b0001_0000);
        assert_eq!(bytes[11], 128);
        assert_eq!(bytes[12], 255);

        let bytes = encode_matrix(&LedMatrix::empty(), 7.0, 0.26, false);
        assert_eq!(bytes[11], 255);
        assert_eq!(bytes[12], 3);

        let bytes = encode_matrix(&LedMatrix::empty(), -1.0, -4.0, false);
        assert_eq!(bytes[11], 0);
        assert_eq!(bytes[12], 0);
    }

    #[test]
    #[should_panic]
    fn test_from_leds_rejects_wrong_size() {
        LedMatrix::from_leds(&[true; 80]);
    }

    #[test]
    fn test_from_pattern_pads_and_truncates() {
        let matrix = LedMatrix::from_pattern("x0 .");
        assert!(matrix.is_on(0, 0));
        assert!(!matrix.is_on(0, 1));
        assert!(!matrix.is_on(0, 2));
        assert!(matrix.is_on(0, 3));
        assert_eq!(matrix.leds().iter().filter(|led| **led).count(), 2);

        let matrix = LedMatrix::from_pattern(&"*".repeat(100));
        assert!(matrix.leds().iter().all(|led| *led));
    }

    #[test]
    fn test_progress_bars() {
        assert_eq!(LedMatrix::progress_vertical_bar(0.0), LedMatrix::empty());
        let half = LedMatrix::progress_vertical_bar(0.5);
        assert!(half.is_on(8, 4));
        assert!(!half.is_on(0, 4));
        assert_eq!(half.leds().iter().filter(|led| **led).count(), 15);

        let full = LedMatrix::progress_volume_bar(1.0);
        assert!(full.is_on(0, 8));
        assert!(full.is_on(8, 0));
        assert!(!full.is_on(0, 7));
        assert_eq!(LedMatrix::progress_volume_bar(0.0), LedMatrix::empty());
    }

    #[test]
    fn test_named_matrices() {
        for name in MATRIX_NAMES {
            assert!(LedMatrix::named(name).is_some(), "{}", name);
        }
        assert!(LedMatrix::named("unknown").is_none());
        assert!(LedMatrix::named("bluetooth").unwrap().is_on(0, 4));
    }
}
