use std::sync::{Arc, Mutex, PoisonError};

use rumi::{
    Error, ErrorKind, MethodId, MethodRegistry, RemoteInfo, RemoteMethod, RemoteParameter,
    RemoteService, Result, Value,
};

pub const ADD: MethodId = MethodId::new(0xC0DE_0001);
pub const DIV: MethodId = MethodId::new(0xC0DE_0002);
pub const FIRE: MethodId = MethodId::new(0xC0DE_0003);
pub const IS_READY: MethodId = MethodId::new(0xC0DE_0004);

/// Demo remote service: a calculator with one fire-and-forget method.
#[derive(Default)]
pub struct Calculator {
    fired: Mutex<Vec<String>>,
}

impl Calculator {
    #[must_use]
    pub fn fired(&self) -> Vec<String> {
        self.fired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RemoteService for Calculator {
    fn remote_info() -> Result<RemoteInfo> {
        use RemoteParameter::{Bool, I32, Str};
        RemoteInfo::new(vec![
            RemoteMethod::new("add", ADD, vec![I32, I32], Some(I32)),
            RemoteMethod::new("div", DIV, vec![I32, I32], Some(I32)),
            RemoteMethod::new("fire", FIRE, vec![Str], None).asynchronous(),
            RemoteMethod::new("isReady", IS_READY, vec![], Some(Bool)),
        ])
    }

    fn export(registry: &mut MethodRegistry<Self>) {
        registry.register(ADD, |_calc: Arc<Calculator>, args| {
            Box::pin(async move {
                let a = args[0].as_i32()?;
                let b = args[1].as_i32()?;
                Ok(Some(Value::I32(a.wrapping_add(b))))
            })
        });
        registry.register(DIV, |_calc: Arc<Calculator>, args| {
            Box::pin(async move {
                let a = args[0].as_i32()?;
                let b = args[1].as_i32()?;
                if b == 0 {
                    return Err(Error::new(
                        ErrorKind::Unknown("ArithmeticError".into()),
                        "division by zero".into(),
                    ));
                }
                Ok(Some(Value::I32(a / b)))
            })
        });
        registry.register(FIRE, |calc: Arc<Calculator>, args| {
            Box::pin(async move {
                let message = args[0].as_str()?.to_string();
                tracing::info!("fired: {message}");
                calc.fired
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(message);
                Ok(None)
            })
        });
        registry.register(IS_READY, |_calc: Arc<Calculator>, _args| {
            Box::pin(async move { Ok(Some(Value::Bool(true))) })
        });
    }
}
