use bytes::Bytes;
use squalldb_common::CommandError;

/// Cursor sequencial sobre os argumentos de um request.
///
/// O processor consome os argumentos na ordem posicional do comando;
/// qualquer falta, sobra ou falha de parse vira um CommandError que o
/// chamador traduz para um status de resposta.
pub struct Args<'a> {
    cmd: &'a str,
    parts: &'a [Bytes],
    pos: usize,
}

impl<'a> Args<'a> {
    pub fn new(cmd: &'a str, parts: &'a [Bytes]) -> Args<'a> {
        Args { cmd, parts, pos: 0 }
    }

    /// Próximo argumento como String UTF-8.
    pub fn next_str(&mut self) -> Result<String, CommandError> {
        let raw = self.next()?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| CommandError::InvalidArgument("string UTF-8 inválida".into()))
    }

    /// Próximo argumento como bytes crus.
    pub fn next_bytes(&mut self) -> Result<Bytes, CommandError> {
        self.next().cloned()
    }

    /// Próximo argumento como i64.
    pub fn next_int(&mut self) -> Result<i64, CommandError> {
        let raw = self.next()?;
        let s = std::str::from_utf8(raw)
            .map_err(|_| CommandError::InvalidArgument("inteiro inválido".into()))?;
        s.parse::<i64>()
            .map_err(|_| CommandError::InvalidArgument(format!("'{s}' não é um inteiro")))
    }

    /// Consome todos os argumentos restantes como strings. Exige pelo menos um.
    pub fn rest_strings(&mut self) -> Result<Vec<String>, CommandError> {
        if !self.has_remaining() {
            return Err(CommandError::WrongArity(self.cmd.to_string()));
        }
        let mut out = Vec::with_capacity(self.remaining());
        while self.has_remaining() {
            out.push(self.next_str()?);
        }
        Ok(out)
    }

    /// Consome todos os argumentos restantes como bytes. Exige pelo menos um.
    pub fn rest_bytes(&mut self) -> Result<Vec<Bytes>, CommandError> {
        if !self.has_remaining() {
            return Err(CommandError::WrongArity(self.cmd.to_string()));
        }
        let out = self.parts[self.pos..].to_vec();
        self.pos = self.parts.len();
        Ok(out)
    }

    /// Garante que todos os argumentos foram consumidos.
    pub fn finish(&self) -> Result<(), CommandError> {
        if self.has_remaining() {
            Err(CommandError::WrongArity(self.cmd.to_string()))
        } else {
            Ok(())
        }
    }

    pub fn has_remaining(&self) -> bool {
        self.pos < self.parts.len()
    }

    pub fn remaining(&self) -> usize {
        self.parts.len() - self.pos
    }

    fn next(&mut self) -> Result<&'a Bytes, CommandError> {
        let part = self
            .parts
            .get(self.pos)
            .ok_or_else(|| CommandError::WrongArity(self.cmd.to_string()))?;
        self.pos += 1;
        Ok(part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_of(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::copy_from_slice(p.as_bytes())).collect()
    }

    #[test]
    fn extracts_in_order() {
        let parts = args_of(&["key", "10", "value"]);
        let mut args = Args::new("SETEX", &parts);
        assert_eq!(args.next_str().unwrap(), "key");
        assert_eq!(args.next_int().unwrap(), 10);
        assert_eq!(args.next_bytes().unwrap(), Bytes::from("value"));
        args.finish().unwrap();
    }

    #[test]
    fn missing_argument_is_wrong_arity() {
        let parts = args_of(&["key"]);
        let mut args = Args::new("LSET", &parts);
        args.next_str().unwrap();
        assert!(matches!(
            args.next_int(),
            Err(CommandError::WrongArity(cmd)) if cmd == "LSET"
        ));
    }

    #[test]
    fn extra_argument_fails_finish() {
        let parts = args_of(&["key", "sobra"]);
        let mut args = Args::new("GET", &parts);
        args.next_str().unwrap();
        assert!(args.finish().is_err());
    }

    #[test]
    fn negative_int_parses() {
        let parts = args_of(&["-1"]);
        let mut args = Args::new("LINDEX", &parts);
        assert_eq!(args.next_int().unwrap(), -1);
    }

    #[test]
    fn non_integer_is_invalid_argument() {
        let parts = args_of(&["abc"]);
        let mut args = Args::new("EXPIRE", &parts);
        assert!(matches!(
            args.next_int(),
            Err(CommandError::InvalidArgument(_))
        ));
    }

    #[test]
    fn rest_strings_requires_one() {
        let parts = args_of(&[]);
        let mut args = Args::new("DEL", &parts);
        assert!(args.rest_strings().is_err());

        let parts = args_of(&["a", "b"]);
        let mut args = Args::new("DEL", &parts);
        assert_eq!(args.rest_strings().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn rest_bytes_consumes_everything() {
        let parts = args_of(&["x", "y", "z"]);
        let mut args = Args::new("LPUSH", &parts);
        args.next_str().unwrap();
        let rest = args.rest_bytes().unwrap();
        assert_eq!(rest, vec![Bytes::from("y"), Bytes::from("z")]);
        args.finish().unwrap();
    }
}
