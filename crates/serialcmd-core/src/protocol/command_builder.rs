//! Command Builder
//!
//! The connection never looks inside a command: anything that can render
//! itself to wire bytes can be sent.

/// Produces the wire payload for one logical command
pub trait CommandBuilder {
    /// Render the command to the bytes that go on the wire
    fn build(&self) -> Vec<u8>;

    /// Human-readable form used in logs and `NoResponse` errors
    fn describe(&self) -> String {
        String::from_utf8_lossy(&self.build()).into_owned()
    }
}

impl CommandBuilder for str {
    fn build(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn describe(&self) -> String {
        self.to_string()
    }
}

impl CommandBuilder for String {
    fn build(&self) -> Vec<u8> {
        self.as_str().build()
    }

    fn describe(&self) -> String {
        self.clone()
    }
}

impl CommandBuilder for [u8] {
    fn build(&self) -> Vec<u8> {
        self.to_vec()
    }
}

impl CommandBuilder for Vec<u8> {
    fn build(&self) -> Vec<u8> {
        self.clone()
    }
}

impl<T: CommandBuilder + ?Sized> CommandBuilder for &T {
    fn build(&self) -> Vec<u8> {
        (**self).build()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Move {
        axis: char,
        steps: i32,
    }

    impl CommandBuilder for Move {
        fn build(&self) -> Vec<u8> {
            format!("MOVE {} {}\r\n", self.axis, self.steps).into_bytes()
        }
    }

    #[test]
    fn test_text_commands() {
        assert_eq!("PING".build(), b"PING".to_vec());
        assert_eq!(String::from("PING").describe(), "PING");
    }

    #[test]
    fn test_raw_commands() {
        let raw: Vec<u8> = vec![0x02, b'R', 0x03];
        assert_eq!(raw.build(), vec![0x02, b'R', 0x03]);
        assert_eq!(raw[..].build(), raw);
    }

    #[test]
    fn test_custom_builder_describe_defaults_to_payload() {
        let cmd = Move { axis: 'X', steps: -40 };
        assert_eq!(cmd.build(), b"MOVE X -40\r\n".to_vec());
        assert_eq!(cmd.describe(), "MOVE X -40\r\n");
        assert_eq!((&cmd).describe(), cmd.describe());
    }
}
