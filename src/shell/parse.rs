use crate::shell::command::Command;

pub fn parse_command(input: &str) -> Option<Command> {
    let tokens: Vec<&str> = input.split_ascii_whitespace().collect();
    let (&cmd, args) = tokens.split_first()?;
    let name = || args.first().map(|s| s.to_string());

    match cmd {
        "help" => Some(Command::Help),
        "ls" => Some(Command::Ls),
        "pwd" => Some(Command::Pwd),
        "mkdir" => name().map(Command::Mkdir),
        "create" => name().map(Command::Create),
        "rm" => name().map(Command::Rm),
        "cd" => Some(Command::Cd(name().unwrap_or_else(|| "/".to_string()))),
        "read" => name().map(Command::Read),
        "write" => match args {
            [file, text @ ..] if !text.is_empty() => {
                Some(Command::Write(file.to_string(), text.join(" ")))
            }
            _ => None,
        },
        "stat" => name().map(Command::Stat),
        "info" => Some(Command::Info),
        "fsck" => Some(Command::Fsck),
        "format" => Some(Command::Format),
        "exit" | "quit" => Some(Command::Exit),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_joins_the_rest() {
        assert_eq!(
            parse_command("write notes.txt hello  there world"),
            Some(Command::Write(
                "notes.txt".to_string(),
                "hello there world".to_string()
            ))
        );
        assert_eq!(parse_command("write notes.txt"), None);
    }

    #[test]
    fn test_missing_argument_is_rejected() {
        assert_eq!(parse_command("mkdir"), None);
        assert_eq!(parse_command("   "), None);
        assert_eq!(parse_command("frobnicate x"), None);
    }

    #[test]
    fn test_bare_cd_goes_home() {
        assert_eq!(parse_command("cd"), Some(Command::Cd("/".to_string())));
        assert_eq!(parse_command(" ls "), Some(Command::Ls));
    }
}
