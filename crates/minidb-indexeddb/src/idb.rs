//! Low-level IndexedDB helpers using web-sys
//!
//! Event handlers are `Closure`s kept alive by a [`Scope`]. Each closure also
//! holds the scope, so the set stays alive on its own until a releasing
//! handler fires and clears it.

use std::cell::RefCell;
use std::rc::Rc;

use minidb_core::{Key, Record};
use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Event, IdbFactory};

use crate::error::{IndexedDbError, Result};

/// Get the global IndexedDB factory.
pub fn idb_factory() -> Result<IdbFactory> {
    let global = js_sys::global();

    let idb: JsValue = js_sys::Reflect::get(&global, &"indexedDB".into())
        .map_err(|_| IndexedDbError::NotAvailable("no indexedDB on global".into()))?;

    if idb.is_undefined() || idb.is_null() {
        return Err(IndexedDbError::NotAvailable(
            "indexedDB is null/undefined".into(),
        ));
    }

    idb.dyn_into::<IdbFactory>()
        .map_err(|_| IndexedDbError::NotAvailable("indexedDB is not IdbFactory".into()))
}

/// Handlers sharing one lifetime.
#[derive(Clone, Default)]
pub struct Scope {
    closures: Rc<RefCell<Vec<Closure<dyn FnMut(Event)>>>>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap `f` as an event handler owned by this scope.
    ///
    /// When `release` is set, firing the handler drops every handler in the
    /// scope, including itself.
    pub fn handler<F>(&self, release: bool, mut f: F) -> js_sys::Function
    where
        F: FnMut(Event) + 'static,
    {
        let keep = self.clone();
        let closure = Closure::wrap(Box::new(move |event: Event| {
            f(event);
            if release {
                keep.release();
            }
        }) as Box<dyn FnMut(Event)>);
        let function = closure.as_ref().unchecked_ref::<js_sys::Function>().clone();
        self.closures.borrow_mut().push(closure);
        function
    }

    /// Drop every handler in the scope.
    pub fn release(&self) {
        let closures = std::mem::take(&mut *self.closures.borrow_mut());
        drop(closures);
    }
}

/// Serialize a record into a structured-cloneable JS value.
pub fn record_to_js(record: &Record) -> Result<JsValue> {
    let json = serde_json::to_string(record)?;
    Ok(js_sys::JSON::parse(&json)?)
}

/// Read a request result back as a record. `undefined` becomes null.
pub fn js_to_record(value: &JsValue) -> Result<Record> {
    if value.is_undefined() || value.is_null() {
        return Ok(Value::Null);
    }
    let json = String::from(js_sys::JSON::stringify(value)?);
    Ok(serde_json::from_str(&json)?)
}

pub fn key_to_js(key: &Key) -> JsValue {
    match key {
        Key::Number(n) => JsValue::from_f64(*n),
        Key::Text(s) => JsValue::from_str(s),
    }
}
