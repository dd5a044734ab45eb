#[cfg(test)]
mod scanner_tests {
    use rope_eval::error::EngineError;
    use rope_eval::scanner::*;
    use rope_eval::token::*;

    fn assert_token_sequence(source: &str, expected: &[(TokenType, &str)]) {
        let scanner = Scanner::new(source);
        let tokens: Vec<_> = scanner.filter_map(Result::ok).collect();

        assert_eq!(tokens.len(), expected.len());

        for (actual, (expected_type, expected_lexeme)) in tokens.iter().zip(expected.iter()) {
            assert_eq!(actual.token_type, *expected_type);
            assert_eq!(actual.lexeme, *expected_lexeme);
        }
    }

    #[test]
    fn test_scanner_01_symbols() {
        assert_token_sequence(
            "({*.,+*})[];:?",
            &[
                (TokenType::LEFT_PAREN, "("),
                (TokenType::LEFT_BRACE, "{"),
                (TokenType::STAR, "*"),
                (TokenType::DOT, "."),
                (TokenType::COMMA, ","),
                (TokenType::PLUS, "+"),
                (TokenType::STAR, "*"),
                (TokenType::RIGHT_BRACE, "}"),
                (TokenType::RIGHT_PAREN, ")"),
                (TokenType::LEFT_BRACKET, "["),
                (TokenType::RIGHT_BRACKET, "]"),
                (TokenType::SEMICOLON, ";"),
                (TokenType::COLON, ":"),
                (TokenType::QUESTION, "?"),
                (TokenType::EOF, ""),
            ],
        );
    }

    #[test]
    fn test_scanner_02_compound_operators() {
        assert_token_sequence(
            "a === b !== c == d != e => ++ -- += -= && ||",
            &[
                (TokenType::IDENTIFIER, "a"),
                (TokenType::EQUAL_EQUAL_EQUAL, "==="),
                (TokenType::IDENTIFIER, "b"),
                (TokenType::BANG_EQUAL_EQUAL, "!=="),
                (TokenType::IDENTIFIER, "c"),
                (TokenType::EQUAL_EQUAL, "=="),
                (TokenType::IDENTIFIER, "d"),
                (TokenType::BANG_EQUAL, "!="),
                (TokenType::IDENTIFIER, "e"),
                (TokenType::ARROW, "=>"),
                (TokenType::PLUS_PLUS, "++"),
                (TokenType::MINUS_MINUS, "--"),
                (TokenType::PLUS_EQUAL, "+="),
                (TokenType::MINUS_EQUAL, "-="),
                (TokenType::AND_AND, "&&"),
                (TokenType::OR_OR, "||"),
                (TokenType::EOF, ""),
            ],
        );
    }

    #[test]
    fn test_scanner_03_keywords_and_identifiers() {
        assert_token_sequence(
            "var let const function with eval $x _y",
            &[
                (TokenType::VAR, "var"),
                (TokenType::LET, "let"),
                (TokenType::CONST, "const"),
                (TokenType::FUNCTION, "function"),
                (TokenType::WITH, "with"),
                (TokenType::IDENTIFIER, "eval"),
                (TokenType::IDENTIFIER, "$x"),
                (TokenType::IDENTIFIER, "_y"),
                (TokenType::EOF, ""),
            ],
        );
    }

    #[test]
    fn test_scanner_04_comments_skipped() {
        let source = "a // line comment\n/* block\ncomment */ b";
        let tokens = scan_all(source).unwrap();

        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[1].lexeme, "b");
        assert_eq!(tokens[1].line, 3);
    }

    #[test]
    fn test_scanner_05_string_escapes() {
        let tokens = scan_all(r#"'a\nb' "\x41B" 'it\'s'"#).unwrap();

        let strings: Vec<String> = tokens
            .iter()
            .filter_map(|t| match &t.token_type {
                TokenType::STRING(s) => Some(s.to_string_lossy()),
                _ => None,
            })
            .collect();

        assert_eq!(strings, vec!["a\nb", "AB", "it's"]);
    }

    #[test]
    fn test_scanner_06_numbers() {
        let tokens = scan_all("42 3.5 .5 1e3 0xff").unwrap();

        let numbers: Vec<f64> = tokens
            .iter()
            .filter_map(|t| match t.token_type {
                TokenType::NUMBER(n) => Some(n),
                _ => None,
            })
            .collect();

        assert_eq!(numbers, vec![42.0, 3.5, 0.5, 1000.0, 255.0]);
    }

    #[test]
    fn test_scanner_07_display_format() {
        let tokens = scan_all("x = 'hi' + 2;").unwrap();
        let lines: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();

        assert_eq!(
            lines,
            vec![
                "IDENTIFIER x null",
                "EQUAL = null",
                "STRING 'hi' hi",
                "PLUS + null",
                "NUMBER 2 2.0",
                "SEMICOLON ; null",
                "EOF  null",
            ]
        );
    }

    #[test]
    fn test_scanner_08_unterminated_string() {
        let err = scan_all("'abc").unwrap_err();

        assert!(matches!(err, EngineError::Lex { line: 1, .. }));
        assert!(err.to_string().contains("Unterminated string."));
    }

    #[test]
    fn test_scanner_09_unexpected_characters_recover() {
        let results: Vec<_> = Scanner::new("$x#=>\u{e9}?").collect();

        // IDENTIFIER, error '#', ARROW, error 'é', QUESTION, EOF
        assert_eq!(results.len(), 6);

        let kinds: Vec<Option<TokenType>> = results
            .iter()
            .map(|r| r.as_ref().ok().map(|t| t.token_type.clone()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                Some(TokenType::IDENTIFIER),
                None,
                Some(TokenType::ARROW),
                None,
                Some(TokenType::QUESTION),
                Some(TokenType::EOF),
            ]
        );

        let messages: Vec<String> = results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .map(|e| e.to_string())
            .collect();
        assert_eq!(
            messages,
            vec![
                "[line 1] SyntaxError: Unexpected character: #",
                "[line 1] SyntaxError: Unexpected character: \u{e9}",
            ]
        );

        let Ok(first) = &results[0] else {
            panic!("expected an identifier");
        };
        assert_eq!(first.lexeme, "$x");
    }

    #[test]
    fn test_scanner_10_json_serialization() {
        let tokens = scan_all("x").unwrap();
        let json = serde_json::to_value(&tokens).unwrap();

        assert_eq!(json[0]["token_type"], "IDENTIFIER");
        assert_eq!(json[0]["lexeme"], "x");
        assert_eq!(json[0]["line"], 1);
        assert_eq!(json[1]["token_type"], "EOF");
    }

    #[test]
    fn test_scanner_11_lone_surrogate_escape() {
        let tokens = scan_all(r#"'\ud800' 'a😀b'"#).unwrap();

        let units: Vec<Vec<u16>> = tokens
            .iter()
            .filter_map(|t| match &t.token_type {
                TokenType::STRING(s) => Some(s.code_units().to_vec()),
                _ => None,
            })
            .collect();

        assert_eq!(units[0], vec![0xD800]);
        assert_eq!(units[1], vec![0x61, 0xD83D, 0xDE00, 0x62]);
    }
}
