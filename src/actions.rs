//! Character gestures
//!
//! Animated gestures (pat, kiss, dance) play a clip and show a short
//! reaction line without touching conversation memory. Spoken gestures
//! (flirt, joke) feed a canned line through the normal reply pipeline as if
//! the user had said it.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use rand::seq::SliceRandom;

use crate::Error;

/// Continuous gestures are cut off after this long
pub const CONTINUOUS_GESTURE_TIMEOUT: Duration = Duration::from_secs(10);

/// A non-conversational character gesture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gesture {
    Pat,
    Kiss,
    Dance,
    Flirt,
    Joke,
}

impl Gesture {
    pub const ALL: [Self; 5] = [Self::Pat, Self::Kiss, Self::Dance, Self::Flirt, Self::Joke];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Pat => "pat",
            Self::Kiss => "kiss",
            Self::Dance => "dance",
            Self::Flirt => "flirt",
            Self::Joke => "joke",
        }
    }

    /// Animation clip played while acting, if any
    #[must_use]
    pub const fn clip(self) -> Option<&'static str> {
        match self {
            Self::Pat => Some("pat"),
            Self::Kiss => Some("kiss"),
            Self::Dance => Some("dance"),
            Self::Flirt | Self::Joke => None,
        }
    }

    /// Whether this gesture runs as a conversational turn
    #[must_use]
    pub const fn is_spoken(self) -> bool {
        self.clip().is_none()
    }

    /// Looping gestures never finish on their own
    #[must_use]
    pub const fn is_continuous(self) -> bool {
        matches!(self, Self::Dance)
    }

    /// Deadline after which a continuous gesture is cancelled
    #[must_use]
    pub const fn auto_cancel_after(self) -> Option<Duration> {
        if self.is_continuous() {
            Some(CONTINUOUS_GESTURE_TIMEOUT)
        } else {
            None
        }
    }

    const fn lines(self) -> &'static [&'static str] {
        match self {
            Self::Pat => &[
                "Your touch feels nice.",
                "Keep petting me like that.",
                "I like it when you do that.",
                "More pets please!",
            ],
            Self::Kiss => &[
                "Here, for you, my love,",
                "You are such a cutie,",
                "Love you,",
                "hihi,",
            ],
            Self::Dance => &[
                "Miku miku oo ee oo",
                "Sekaaaiii dene",
                "Hit them with it",
            ],
            Self::Flirt => &[
                "If I were real, I'd give you a big hug.",
                "You're looking great today.",
                "I may be digital, but I enjoy our time together.",
                "Want to know what I'd do if I had a real body?",
                "You make me happy, you know that?",
                "If I could, I'd never let you go.",
                "You're awesome!",
                "I dream about hanging out with you every day.",
            ],
            Self::Joke => &[
                "Why don't foxes ever get lost? Because we're always following our nose!",
                "What do you call a fox who's also a computer programmer? A Firefox developer!",
                "I told my developer I wanted to be more realistic. Now I have commitment issues! Just kidding.",
                "Why did the fox cross the road? To get to the human on the other side!",
                "What's a fox's favorite type of music? Anything with a good tail-beat!",
                "How do you know when a fox is joking? When they keep saying 'what does the fox say?'",
            ],
        }
    }

    const fn extras(self) -> &'static [&'static str] {
        match self {
            Self::Pat => &[" hmm", " hihi."],
            Self::Kiss => &["", " mwa", " bisous", " hihi."],
            Self::Dance => &[""],
            Self::Flirt => &["", " hihi.", " Grrrr."],
            Self::Joke => &["", " hihi.", " Hahahaha."],
        }
    }

    /// Pick a line (reaction or synthetic utterance) for this gesture
    pub fn pick_line<R: Rng + ?Sized>(self, rng: &mut R) -> String {
        let line = self.lines().choose(rng).copied().unwrap_or_default();
        let extra = self.extras().choose(rng).copied().unwrap_or_default();
        format!("{line}{extra}")
    }

    /// Whether `line` could have come from [`Self::pick_line`]
    #[must_use]
    pub fn is_own_line(self, line: &str) -> bool {
        self.lines().iter().any(|l| {
            line.strip_prefix(l)
                .is_some_and(|rest| self.extras().contains(&rest))
        })
    }
}

impl fmt::Display for Gesture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Gesture {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|g| g.name() == wanted)
            .ok_or_else(|| Error::Config(format!("unknown gesture: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn test_parse_gesture() {
        assert_eq!("Pat".parse::<Gesture>().unwrap(), Gesture::Pat);
        assert_eq!(" dance ".parse::<Gesture>().unwrap(), Gesture::Dance);
        assert!("wave".parse::<Gesture>().is_err());
    }

    #[test]
    fn test_spoken_and_animated_split() {
        let spoken: Vec<_> = Gesture::ALL.into_iter().filter(|g| g.is_spoken()).collect();
        assert_eq!(spoken, [Gesture::Flirt, Gesture::Joke]);
        assert_eq!(Gesture::Dance.auto_cancel_after(), Some(CONTINUOUS_GESTURE_TIMEOUT));
        assert_eq!(Gesture::Pat.auto_cancel_after(), None);
    }

    #[test]
    fn test_pick_line_comes_from_table() {
        let mut rng = StdRng::seed_from_u64(7);
        for gesture in Gesture::ALL {
            for _ in 0..20 {
                let line = gesture.pick_line(&mut rng);
                assert!(gesture.is_own_line(&line), "{gesture}: {line}");
            }
        }
    }
}
