//! Terminal input parsing.
//!
//! Plain lines are chat. Lines starting with `/` are commands; `//` escapes a
//! chat line that should start with a slash. Drawing commands take canvas
//! coordinates and use the current pen color.

use frames::shape::ColorParseError;
use frames::{Color, Point, Shape};

pub const HELP: &str = "\
commands:
  /line x1 y1 x2 y2       draw a line
  /rect x y w h           draw a rectangle
  /oval x y w h           draw an oval
  /circle x y d           draw a circle
  /free x1 y1 x2 y2 ...   freehand stroke through the points
  /text x y words...      place text
  /erase x y size         erase a square
  /color <name|#rrggbb>   set the pen color
  /clear                  clear the board
  /open <json>            replace the board with a JSON shape list
  /users                  show who is connected
  /board                  list shapes on the board
  /help                   show this help
  /quit                   leave
manager only:
  /kick <user>            remove a user
  /approve [user]         approve a pending join request
  /deny [user]            deny a pending join request
anything else is sent as chat";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Chat(String),
    Draw(Shape),
    Pen(Color),
    Clear,
    Open(Vec<Shape>),
    Users,
    Board,
    Help,
    Quit,
    Kick(String),
    Approve(Option<String>),
    Deny(Option<String>),
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command /{0} (try /help)")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("not a number: {0}")]
    Number(String),
    #[error(transparent)]
    Color(#[from] ColorParseError),
    #[error("invalid shape list: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parse one input line. Blank lines yield `None`.
///
/// # Errors
///
/// Returns [`CommandError`] for unknown commands and malformed arguments.
pub fn parse(line: &str, pen: Color) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if let Some(escaped) = line.strip_prefix("//") {
        return Ok(Some(Command::Chat(format!("/{escaped}"))));
    }
    let Some(body) = line.strip_prefix('/') else {
        return Ok(Some(Command::Chat(line.to_owned())));
    };

    let (name, rest) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
    let rest = rest.trim();
    let args: Vec<&str> = rest.split_whitespace().collect();

    let command = match name {
        "line" => {
            let [x1, y1, x2, y2] = numbers::<4>(&args, "/line x1 y1 x2 y2")?;
            Command::Draw(Shape::Line { color: pen, start: Point::new(x1, y1), end: Point::new(x2, y2) })
        }
        "rect" => {
            let [x, y, width, height] = numbers::<4>(&args, "/rect x y w h")?;
            Command::Draw(Shape::Rectangle { color: pen, origin: Point::new(x, y), width, height })
        }
        "oval" => {
            let [x, y, width, height] = numbers::<4>(&args, "/oval x y w h")?;
            Command::Draw(Shape::Oval { color: pen, origin: Point::new(x, y), width, height })
        }
        "circle" => {
            let [x, y, diameter] = numbers::<3>(&args, "/circle x y d")?;
            Command::Draw(Shape::Circle { color: pen, origin: Point::new(x, y), diameter })
        }
        "free" => {
            const USAGE: &str = "/free x1 y1 x2 y2 ...";
            if args.is_empty() || args.len() % 2 != 0 {
                return Err(CommandError::Usage(USAGE));
            }
            let coords = args.iter().map(|a| number(a)).collect::<Result<Vec<_>, _>>()?;
            let points = coords.chunks_exact(2).map(|p| Point::new(p[0], p[1])).collect();
            Command::Draw(Shape::FreeDraw { color: pen, points })
        }
        "text" => {
            const USAGE: &str = "/text x y words...";
            if args.len() < 3 {
                return Err(CommandError::Usage(USAGE));
            }
            let [x, y] = numbers::<2>(&args[..2], USAGE)?;
            let text = args[2..].join(" ");
            Command::Draw(Shape::Text { color: pen, origin: Point::new(x, y), text })
        }
        "erase" => {
            let [x, y, size] = numbers::<3>(&args, "/erase x y size")?;
            Command::Draw(Shape::Eraser { color: Color::WHITE, center: Point::new(x, y), size })
        }
        "color" => match args.as_slice() {
            [color] => Command::Pen(color.parse()?),
            _ => return Err(CommandError::Usage("/color <name|#rrggbb>")),
        },
        "clear" => Command::Clear,
        "open" => {
            if rest.is_empty() {
                return Err(CommandError::Usage("/open <json shape list>"));
            }
            Command::Open(serde_json::from_str(rest)?)
        }
        "users" => Command::Users,
        "board" => Command::Board,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        "kick" => match args.as_slice() {
            [user] => Command::Kick((*user).to_owned()),
            _ => return Err(CommandError::Usage("/kick <user>")),
        },
        "approve" => Command::Approve(optional_user(&args, "/approve [user]")?),
        "deny" => Command::Deny(optional_user(&args, "/deny [user]")?),
        other => return Err(CommandError::Unknown(other.to_owned())),
    };
    Ok(Some(command))
}

fn number(raw: &str) -> Result<f64, CommandError> {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(CommandError::Number(raw.to_owned())),
    }
}

fn numbers<const N: usize>(args: &[&str], usage: &'static str) -> Result<[f64; N], CommandError> {
    if args.len() != N {
        return Err(CommandError::Usage(usage));
    }
    let mut out = [0.0; N];
    for (slot, raw) in out.iter_mut().zip(args) {
        *slot = number(raw)?;
    }
    Ok(out)
}

fn optional_user(args: &[&str], usage: &'static str) -> Result<Option<String>, CommandError> {
    match args {
        [] => Ok(None),
        [user] => Ok(Some((*user).to_owned())),
        _ => Err(CommandError::Usage(usage)),
    }
}

#[cfg(test)]
#[path = "commands_test.rs"]
mod tests;
