use super::*;

const RED: Color = Color::rgb(255, 0, 0);

fn ok(line: &str) -> Command {
    parse(line, RED).expect("parse").expect("command")
}

#[test]
fn plain_text_is_chat_and_blank_is_nothing() {
    assert_eq!(ok("  hello there "), Command::Chat("hello there".into()));
    assert!(parse("   ", RED).expect("parse").is_none());
    assert_eq!(ok("//shrug"), Command::Chat("/shrug".into()));
}

#[test]
fn drawing_commands_use_the_pen() {
    assert_eq!(
        ok("/line 0 0 10 20"),
        Command::Draw(Shape::Line { color: RED, start: Point::new(0.0, 0.0), end: Point::new(10.0, 20.0) })
    );
    assert_eq!(
        ok("/rect 1 2 3 4"),
        Command::Draw(Shape::Rectangle { color: RED, origin: Point::new(1.0, 2.0), width: 3.0, height: 4.0 })
    );
    assert_eq!(
        ok("/oval 1 2 3 4"),
        Command::Draw(Shape::Oval { color: RED, origin: Point::new(1.0, 2.0), width: 3.0, height: 4.0 })
    );
    assert_eq!(
        ok("/circle 5 6 7"),
        Command::Draw(Shape::Circle { color: RED, origin: Point::new(5.0, 6.0), diameter: 7.0 })
    );
}

#[test]
fn free_draw_keeps_point_order() {
    let Command::Draw(Shape::FreeDraw { points, .. }) = ok("/free 0 0 5 5 10 0") else {
        panic!("expected free draw");
    };
    assert_eq!(points, vec![Point::new(0.0, 0.0), Point::new(5.0, 5.0), Point::new(10.0, 0.0)]);
    assert!(matches!(parse("/free 1 2 3", RED), Err(CommandError::Usage(_))));
}

#[test]
fn text_joins_the_remaining_words() {
    assert_eq!(
        ok("/text 3 4 hello   big world"),
        Command::Draw(Shape::Text { color: RED, origin: Point::new(3.0, 4.0), text: "hello big world".into() })
    );
    assert!(matches!(parse("/text 3 4", RED), Err(CommandError::Usage(_))));
}

#[test]
fn eraser_ignores_the_pen() {
    assert_eq!(
        ok("/erase 10 10 8"),
        Command::Draw(Shape::Eraser { color: Color::WHITE, center: Point::new(10.0, 10.0), size: 8.0 })
    );
}

#[test]
fn color_accepts_names_and_hex() {
    assert_eq!(ok("/color blue"), Command::Pen(Color::rgb(0, 0, 255)));
    assert_eq!(ok("/color #102030"), Command::Pen(Color::rgb(16, 32, 48)));
    assert!(matches!(parse("/color mauve-ish", RED), Err(CommandError::Color(_))));
}

#[test]
fn open_parses_a_json_shape_list() {
    let json = r##"/open [{"kind":"circle","color":"#000000","origin":{"x":1,"y":2},"diameter":3}]"##;
    assert_eq!(
        ok(json),
        Command::Open(vec![Shape::Circle { color: Color::BLACK, origin: Point::new(1.0, 2.0), diameter: 3.0 }])
    );
    assert!(matches!(parse("/open [{]", RED), Err(CommandError::Json(_))));
    assert!(matches!(parse("/open", RED), Err(CommandError::Usage(_))));
}

#[test]
fn manager_commands() {
    assert_eq!(ok("/kick bob"), Command::Kick("bob".into()));
    assert_eq!(ok("/approve"), Command::Approve(None));
    assert_eq!(ok("/approve carol"), Command::Approve(Some("carol".into())));
    assert_eq!(ok("/deny dave"), Command::Deny(Some("dave".into())));
    assert!(matches!(parse("/kick", RED), Err(CommandError::Usage(_))));
}

#[test]
fn simple_commands() {
    assert_eq!(ok("/clear"), Command::Clear);
    assert_eq!(ok("/users"), Command::Users);
    assert_eq!(ok("/board"), Command::Board);
    assert_eq!(ok("/help"), Command::Help);
    assert_eq!(ok("/quit"), Command::Quit);
}

#[test]
fn bad_input_is_reported() {
    assert!(matches!(parse("/line 1 2 3", RED), Err(CommandError::Usage(_))));
    assert!(matches!(parse("/circle a b c", RED), Err(CommandError::Number(ref n)) if n == "a"));
    assert!(matches!(parse("/circle 1 2 inf", RED), Err(CommandError::Number(_))));
    assert!(matches!(parse("/teleport", RED), Err(CommandError::Unknown(ref c)) if c == "teleport"));
}
