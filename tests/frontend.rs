use hyacinth::{
    DiagnosticKind,
    ast::{ExprKind, StmtKind},
    bytecode::{self, Chunk, Constant, DecodeError, FORMAT_VERSION, MAGIC},
    compiler,
    lexer::{Keyword, Lexer, TokenKind},
    literal::{LiteralKind, TypeLiteral},
    parser::parse_program,
};
use pretty_assertions::assert_eq;

fn kinds(source: &str) -> Vec<TokenKind> {
    Lexer::new(source)
        .tokenize()
        .expect("tokenize")
        .into_iter()
        .map(|token| token.kind)
        .collect()
}

#[test]
fn lexes_operators_and_keywords() {
    assert_eq!(
        kinds("var x = a <= b && !c // trailing\n/* block */ import"),
        vec![
            TokenKind::Keyword(Keyword::Var),
            TokenKind::Identifier,
            TokenKind::Assign,
            TokenKind::Identifier,
            TokenKind::LessEqual,
            TokenKind::Identifier,
            TokenKind::DoubleAmpersand,
            TokenKind::Bang,
            TokenKind::Identifier,
            TokenKind::Keyword(Keyword::Import),
            TokenKind::Eof,
        ]
    );
}

#[test]
fn string_escapes_are_decoded() {
    let tokens = Lexer::new(r#""a\"b\n""#).tokenize().expect("tokenize");
    assert_eq!(tokens[0].kind, TokenKind::String);
    assert_eq!(tokens[0].lexeme, "a\"b\n");
}

#[test]
fn unterminated_input_is_a_lexer_error() {
    let err = Lexer::new("\"open").tokenize().unwrap_err();
    assert_eq!(err.kind, DiagnosticKind::Lexer);
    let err = Lexer::new("/* open").tokenize().unwrap_err();
    assert!(err.message.contains("unterminated block comment"));
}

#[test]
fn parses_imports_with_and_without_alias() {
    let program = parse_program("import runner; import runner as rt").expect("parse");
    let imports: Vec<_> = program
        .items
        .iter()
        .map(|stmt| match &stmt.kind {
            StmtKind::Import { name, alias } => (name.clone(), alias.clone()),
            other => panic!("expected import, found {other:?}"),
        })
        .collect();
    assert_eq!(
        imports,
        vec![
            ("runner".to_string(), None),
            ("runner".to_string(), Some("rt".to_string())),
        ]
    );
}

#[test]
fn braces_open_blocks_in_statement_position_and_maps_elsewhere() {
    let program = parse_program("{ var a = 1 } var m = { \"k\": 2 }").expect("parse");
    assert!(matches!(program.items[0].kind, StmtKind::Block(_)));
    match &program.items[1].kind {
        StmtKind::VarDecl {
            initializer: Some(expr),
            ..
        } => assert!(matches!(&expr.kind, ExprKind::MapLiteral(entries) if entries.len() == 1)),
        other => panic!("expected declaration, found {other:?}"),
    }
}

#[test]
fn rejects_duplicate_parameters() {
    let err = parse_program("fn f(a, a) { }").unwrap_err();
    assert_eq!(err.kind, DiagnosticKind::Parser);
    assert!(err.message.contains("duplicate parameter name"));
}

#[test]
fn rejects_invalid_assignment_targets() {
    let err = parse_program("1 + 2 = 3").unwrap_err();
    assert!(err.message.contains("invalid assignment target"));
    let err = compiler::compile("f().x = 3").unwrap_err();
    assert_eq!(err.kind, DiagnosticKind::Compiler);
}

#[test]
fn rejects_unknown_type_annotations() {
    let err = compiler::compile("var x: integer = 1").unwrap_err();
    assert_eq!(err.kind, DiagnosticKind::Compiler);
    assert!(err.message.contains("unknown type `integer`"));
}

#[test]
fn compiled_chunks_carry_header_and_constants() {
    let bytes = compiler::compile("const limit: dictionary<string, number> = {}").expect("compile");
    assert!(bytes.starts_with(MAGIC));
    assert_eq!(bytes[MAGIC.len()], FORMAT_VERSION);

    let chunk = Chunk::decode(&bytes).expect("decode");
    assert!(chunk.params.is_empty());
    let expected = TypeLiteral::new(LiteralKind::Dictionary)
        .with_subtype(TypeLiteral::new(LiteralKind::String))
        .with_subtype(TypeLiteral::new(LiteralKind::Number))
        .constant();
    assert!(chunk.constants.contains(&Constant::Type(expected)));
    assert!(
        chunk
            .constants
            .contains(&Constant::Identifier("limit".into()))
    );
}

#[test]
fn functions_compile_to_nested_chunks() {
    let bytes = compiler::compile("fn add(a, b) { return a + b; }").expect("compile");
    let chunk = Chunk::decode(&bytes).expect("decode");
    let body = chunk
        .constants
        .iter()
        .find_map(|constant| match constant {
            Constant::Function(body) => Some(body.clone()),
            _ => None,
        })
        .expect("function constant");
    let function = Chunk::decode(&body).expect("decode body");
    let params: Vec<&str> = function.params.iter().map(|param| &**param).collect();
    assert_eq!(params, vec!["a", "b"]);
}

#[test]
fn chunk_encoding_is_stable() {
    let bytes = compiler::compile("var x = [1, \"two\", null, true]; print x;").expect("compile");
    let chunk = Chunk::decode(&bytes).expect("decode");
    assert_eq!(chunk.encode(), bytes);
}

#[test]
fn header_checks_report_what_is_wrong() {
    assert_eq!(bytecode::check_header(b"HY"), Err(DecodeError::BadMagic));
    assert_eq!(bytecode::check_header(b"XXXX\x01"), Err(DecodeError::BadMagic));
    assert_eq!(
        bytecode::check_header(b"HYCB\x09"),
        Err(DecodeError::UnsupportedVersion(9))
    );
    assert_eq!(bytecode::check_header(b"HYCB\x01"), Ok(()));
}

#[test]
fn truncated_chunks_fail_to_decode() {
    let bytes = compiler::compile("var x = \"hello\";").expect("compile");
    let truncated = &bytes[..bytes.len() - 3];
    assert!(matches!(
        Chunk::decode(truncated),
        Err(DecodeError::UnexpectedEof(_))
    ));
}
