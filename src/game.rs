use std::str::FromStr;

use crate::playroom::Error;
use crate::templates;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Game {
    Breakout,
    Platformer,
    HelloWorld,
    Puzzle,
    Stress,
}

impl Game {
    pub fn name(self) -> &'static str {
        match self {
            Self::Breakout => "Breakout",
            Self::Platformer => "Platformer",
            Self::HelloWorld => "Hello World",
            Self::Puzzle => "Puzzle",
            Self::Stress => "Stress",
        }
    }

    pub fn page(self) -> &'static str {
        match self {
            Self::Breakout => templates::BREAKOUT,
            Self::Platformer => templates::PLATFORMER,
            Self::HelloWorld => templates::HELLO,
            Self::Puzzle => templates::PUZZLE,
            Self::Stress => templates::STRESS,
        }
    }
}

impl FromStr for Game {
    type Err = Error;

    // exact match, as offered by the selection page
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Breakout" => Ok(Self::Breakout),
            "Platformer" => Ok(Self::Platformer),
            "Hello World" => Ok(Self::HelloWorld),
            "Puzzle" => Ok(Self::Puzzle),
            "Stress" => Ok(Self::Stress),
            _ => Err(Error::UnknownGame),
        }
    }
}
