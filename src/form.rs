//! Request bodies, as posted by the html forms, and their validation into the
//! values the rest of playroom works with.
//!
//! Every field defaults to empty so a missing field is reported the same way
//! as a blank one, with the form's own message rather than a decode failure.

use serde::Deserialize;

use crate::game::Game;
use crate::playroom::{Error, Result};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegisterForm {
    pub username: String,
    pub password: String,
    pub confirmation: String,
    pub email: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GameForm {
    pub game: String,
}

pub struct Registration {
    pub username: String,
    pub password: String,
    pub email: String,
}

pub struct Credentials {
    pub username: String,
    pub password: String,
}

// form decoding swaps invalid utf-8 for U+FFFD rather than failing
fn required(value: String, message: &'static str) -> Result<String> {
    if value.trim().is_empty() {
        Err(Error::Invalid(message))
    } else if value.contains(char::REPLACEMENT_CHARACTER) {
        Err(Error::Invalid("invalid characters in form"))
    } else {
        Ok(value)
    }
}

impl TryFrom<RegisterForm> for Registration {
    type Error = Error;

    fn try_from(form: RegisterForm) -> Result<Self> {
        let RegisterForm {
            username,
            password,
            confirmation,
            email,
        } = form;

        let username = required(username, "You are required to enter your name.")?;
        let password = required(password, "You are required to enter your password")?;
        let email = required(email, "You are required to enter your email")?;

        if password != confirmation {
            return Err(Error::Invalid("Sorry, password doesn't match"));
        }

        Ok(Self {
            username,
            password,
            email,
        })
    }
}

impl TryFrom<LoginForm> for Credentials {
    type Error = Error;

    fn try_from(form: LoginForm) -> Result<Self> {
        Ok(Self {
            username: required(form.username, "must provide username")?,
            password: required(form.password, "must provide password")?,
        })
    }
}

impl TryFrom<GameForm> for Game {
    type Error = Error;

    fn try_from(form: GameForm) -> Result<Self> {
        required(form.game, "must choose a game")?.parse()
    }
}
