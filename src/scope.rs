use std::{cell::RefCell, rc::Rc};

use crate::{
    diagnostics::Diagnostic,
    dictionary::LiteralDictionary,
    literal::{Literal, TypeLiteral},
};

pub type ScopeRef = Rc<RefCell<Scope>>;

/// One level of the lexical scope chain. Variables and their declared types are stored in
/// literal dictionaries keyed by identifier literals.
#[derive(Debug, Default)]
pub struct Scope {
    ancestor: Option<ScopeRef>,
    variables: LiteralDictionary,
    types: LiteralDictionary,
}

impl Scope {
    pub fn new() -> ScopeRef {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn push(ancestor: &ScopeRef) -> ScopeRef {
        Rc::new(RefCell::new(Self {
            ancestor: Some(Rc::clone(ancestor)),
            ..Self::default()
        }))
    }

    /// Returns the enclosing scope, or `scope` itself at the root.
    pub fn pop(scope: &ScopeRef) -> ScopeRef {
        scope
            .borrow()
            .ancestor
            .clone()
            .unwrap_or_else(|| Rc::clone(scope))
    }

    /// Declares `key` in this scope with the given type. Returns `false` if the name is
    /// already declared at this level.
    pub fn declare(scope: &ScopeRef, key: &Literal, ty: &TypeLiteral) -> bool {
        let mut scope = scope.borrow_mut();
        if scope.variables.exists(key) {
            return false;
        }
        if scope.variables.set(key, &Literal::Null).is_err() {
            return false;
        }
        scope.types.set(key, &Literal::type_of(ty.clone())).is_ok()
    }

    /// True when `key` is declared anywhere in the chain.
    pub fn is_declared(scope: &ScopeRef, key: &Literal) -> bool {
        if scope.borrow().variables.exists(key) {
            return true;
        }
        let ancestor = scope.borrow().ancestor.clone();
        match ancestor {
            Some(ancestor) => Scope::is_declared(&ancestor, key),
            None => false,
        }
    }

    pub fn get(scope: &ScopeRef, key: &Literal) -> Option<Literal> {
        {
            let current = scope.borrow();
            if current.variables.exists(key) {
                return Some(current.variables.get(key));
            }
        }
        let ancestor = scope.borrow().ancestor.clone();
        ancestor.and_then(|ancestor| Scope::get(&ancestor, key))
    }

    /// Assigns to the nearest declaration of `key`, checking its declared type. When
    /// `const_check` is set, constant bindings reject the write.
    pub fn set(
        scope: &ScopeRef,
        key: &Literal,
        value: &Literal,
        const_check: bool,
    ) -> Result<(), Diagnostic> {
        let declared = scope.borrow().variables.exists(key);
        if !declared {
            let ancestor = scope.borrow().ancestor.clone();
            return match ancestor {
                Some(ancestor) => Scope::set(&ancestor, key, value, const_check),
                None => Err(Diagnostic::runtime(format!("undeclared variable `{key}`"))),
            };
        }

        let mut current = scope.borrow_mut();
        if let Literal::Type(ty) = current.types.get(key) {
            if const_check && ty.constant {
                return Err(Diagnostic::runtime(format!(
                    "can't assign to constant `{key}`"
                )));
            }
            if !ty.accepts(value) {
                return Err(Diagnostic::runtime(format!(
                    "can't assign {} to `{key}` of type {ty}",
                    value.kind()
                )));
            }
        }
        current
            .variables
            .set(key, value)
            .map(|_| ())
            .map_err(|err| Diagnostic::runtime(err.to_string()))
    }
}
