#![allow(dead_code)]

use std::{cell::RefCell, rc::Rc};

use hyacinth::Interpreter;

/// Lines written to each of an interpreter's sinks.
#[derive(Clone, Default)]
pub struct Output {
    pub print: Rc<RefCell<Vec<String>>>,
    pub assert: Rc<RefCell<Vec<String>>>,
    pub error: Rc<RefCell<Vec<String>>>,
}

impl Output {
    pub fn printed(&self) -> Vec<String> {
        self.print.borrow().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.error.borrow().clone()
    }

    pub fn asserts(&self) -> Vec<String> {
        self.assert.borrow().clone()
    }
}

pub fn capture(interpreter: &mut Interpreter) -> Output {
    let output = Output::default();
    let print = Rc::clone(&output.print);
    interpreter.set_print_sink(move |line| print.borrow_mut().push(line.to_string()));
    let assert = Rc::clone(&output.assert);
    interpreter.set_assert_sink(move |line| assert.borrow_mut().push(line.to_string()));
    let error = Rc::clone(&output.error);
    interpreter.set_error_sink(move |line| error.borrow_mut().push(line.to_string()));
    output
}
