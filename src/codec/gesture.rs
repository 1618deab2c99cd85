//! Gestures reported by the accessory's sensors.

use std::fmt;
use std::str::FromStr;

use crate::error::GestureParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gesture {
    Undefined,
    ButtonPress,
    ButtonDoublePress,
    ButtonRelease,
    Rotate,
    TouchLeftDown,
    TouchLeftRelease,
    TouchRightDown,
    TouchRightRelease,
    TouchTopDown,
    TouchTopRelease,
    TouchBottomDown,
    TouchBottomRelease,
    SwipeLeft,
    SwipeRight,
    SwipeUp,
    SwipeDown,
    FlyLeft,
    FlyRight,
    FlyBackwards,
    FlyTowards,
    FlyUpDown,
}

pub const GESTURES: [Gesture; 22] = [
    Gesture::Undefined,
    Gesture::ButtonPress,
    Gesture::ButtonDoublePress,
    Gesture::ButtonRelease,
    Gesture::Rotate,
    Gesture::TouchLeftDown,
    Gesture::TouchLeftRelease,
    Gesture::TouchRightDown,
    Gesture::TouchRightRelease,
    Gesture::TouchTopDown,
    Gesture::TouchTopRelease,
    Gesture::TouchBottomDown,
    Gesture::TouchBottomRelease,
    Gesture::SwipeLeft,
    Gesture::SwipeRight,
    Gesture::SwipeUp,
    Gesture::SwipeDown,
    Gesture::FlyLeft,
    Gesture::FlyRight,
    Gesture::FlyBackwards,
    Gesture::FlyTowards,
    Gesture::FlyUpDown,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TouchArea {
    Left,
    Top,
    Right,
    Bottom,
}

impl Gesture {
    /// Stable name of the gesture, for example "SwipeLeft".
    pub fn identifier(&self) -> &'static str {
        match self {
            Gesture::Undefined => "Undefined",
            Gesture::ButtonPress => "ButtonPress",
            Gesture::ButtonDoublePress => "ButtonDoublePress",
            Gesture::ButtonRelease => "ButtonRelease",
            Gesture::Rotate => "Rotate",
            Gesture::TouchLeftDown => "TouchLeftDown",
            Gesture::TouchLeftRelease => "TouchLeftRelease",
            Gesture::TouchRightDown => "TouchRightDown",
            Gesture::TouchRightRelease => "TouchRightRelease",
            Gesture::TouchTopDown => "TouchTopDown",
            Gesture::TouchTopRelease => "TouchTopRelease",
            Gesture::TouchBottomDown => "TouchBottomDown",
            Gesture::TouchBottomRelease => "TouchBottomRelease",
            Gesture::SwipeLeft => "SwipeLeft",
            Gesture::SwipeRight => "SwipeRight",
            Gesture::SwipeUp => "SwipeUp",
            Gesture::SwipeDown => "SwipeDown",
            Gesture::FlyLeft => "FlyLeft",
            Gesture::FlyRight => "FlyRight",
            Gesture::FlyBackwards => "FlyBackwards",
            Gesture::FlyTowards => "FlyTowards",
            Gesture::FlyUpDown => "FlyUpDown",
        }
    }

    fn touch_area(&self) -> Option<TouchArea> {
        match self {
            Gesture::TouchLeftDown | Gesture::TouchLeftRelease | Gesture::SwipeLeft => Some(TouchArea::Left),
            Gesture::TouchTopDown | Gesture::TouchTopRelease | Gesture::SwipeUp => Some(TouchArea::Top),
            Gesture::TouchRightDown | Gesture::TouchRightRelease | Gesture::SwipeRight => Some(TouchArea::Right),
            Gesture::TouchBottomDown | Gesture::TouchBottomRelease | Gesture::SwipeDown => Some(TouchArea::Bottom),
            _ => None,
        }
    }

    /// The touch down gesture of the same area, if this is a touch or swipe gesture.
    pub fn touch_down_gesture(&self) -> Option<Gesture> {
        self.touch_area().map(|area| match area {
            TouchArea::Left => Gesture::TouchLeftDown,
            TouchArea::Top => Gesture::TouchTopDown,
            TouchArea::Right => Gesture::TouchRightDown,
            TouchArea::Bottom => Gesture::TouchBottomDown,
        })
    }

    /// The touch release gesture of the same area, if this is a touch or swipe gesture.
    pub fn touch_release_gesture(&self) -> Option<Gesture> {
        self.touch_area().map(|area| match area {
            TouchArea::Left => Gesture::TouchLeftRelease,
            TouchArea::Top => Gesture::TouchTopRelease,
            TouchArea::Right => Gesture::TouchRightRelease,
            TouchArea::Bottom => Gesture::TouchBottomRelease,
        })
    }

    /// The swipe gesture of the same area, if this is a touch or swipe gesture.
    pub fn swipe_gesture(&self) -> Option<Gesture> {
        self.touch_area().map(|area| match area {
            TouchArea::Left => Gesture::SwipeLeft,
            TouchArea::Top => Gesture::SwipeUp,
            TouchArea::Right => Gesture::SwipeRight,
            TouchArea::Bottom => Gesture::SwipeDown,
        })
    }
}

impl fmt::Display for Gesture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

impl FromStr for Gesture {
    type Err = GestureParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GESTURES
            .iter()
            .find(|gesture| gesture.identifier() == s)
            .copied()
            .ok_or_else(|| GestureParseError::InvalidIdentifier(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GestureEvent {
    pub gesture: Gesture,
    // rotation delta, fly speed or the raw button byte; None for gestures without a magnitude
    pub value: Option<i32>,
}

impl GestureEvent {
    pub fn new(gesture: Gesture, value: Option<i32>) -> Self {
        GestureEvent { gesture, value }
    }
}

impl fmt::Display for GestureEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Some(value) => write!(f, "{}({})", self.gesture, value),
            None => write!(f, "{}", self.gesture),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers_round_trip() {
        for gesture in GESTURES {
            assert_eq!(gesture.identifier().parse::<Gesture>().unwrap(), gesture);
        }
        assert!("Wiggle".parse::<Gesture>().is_err());
    }

    #[test]
    fn test_touch_relations() {
        assert_eq!(Gesture::SwipeUp.touch_down_gesture(), Some(Gesture::TouchTopDown));
        assert_eq!(Gesture::TouchRightDown.touch_release_gesture(), Some(Gesture::TouchRightRelease));
        assert_eq!(Gesture::TouchBottomRelease.swipe_gesture(), Some(Gesture::SwipeDown));
        assert_eq!(Gesture::Rotate.swipe_gesture(), None);
        assert_eq!(Gesture::FlyLeft.touch_down_gesture(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(GestureEvent::new(Gesture::Rotate, Some(-12)).to_string(), "Rotate(-12)");
        assert_eq!(GestureEvent::new(Gesture::SwipeLeft, None).to_string(), "SwipeLeft");
    }
}
