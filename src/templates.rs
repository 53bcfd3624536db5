pub const INDEX: &str = include_str!("../templates/index.html");
pub const LOGIN: &str = include_str!("../templates/login.html");
pub const REGISTER: &str = include_str!("../templates/register.html");
pub const GAMES: &str = include_str!("../templates/games.html");

pub const BREAKOUT: &str = include_str!("../templates/breakout.html");
pub const PLATFORMER: &str = include_str!("../templates/platformer.html");
pub const HELLO: &str = include_str!("../templates/hello.html");
pub const PUZZLE: &str = include_str!("../templates/puzzle.html");
pub const STRESS: &str = include_str!("../templates/stress.html");

const APOLOGY: &str = include_str!("../templates/apology.html");

/// The error page shown for a rejected request.
pub fn apology(message: &str, code: u16) -> String {
    APOLOGY
        .replace("{code}", &code.to_string())
        .replace("{message}", &escape(message))
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}
