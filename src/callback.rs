//! Inline-button callback data, encoded as `VERB:orderCode`.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    PayBtc(String),
    PayTranscash(String),
    SendLabel(String),
    AdminConfirmPaid(String),
    AdminCancel(String),
    AdminDone(String),
}

impl CallbackAction {
    fn parts(&self) -> (&'static str, &str) {
        match self {
            CallbackAction::PayBtc(code) => ("PAY_BTC", code.as_str()),
            CallbackAction::PayTranscash(code) => ("PAY_TC", code.as_str()),
            CallbackAction::SendLabel(code) => ("SEND_PDF", code.as_str()),
            CallbackAction::AdminConfirmPaid(code) => ("ADM_PAID", code.as_str()),
            CallbackAction::AdminCancel(code) => ("ADM_CANCEL", code.as_str()),
            CallbackAction::AdminDone(code) => ("ADM_DONE", code.as_str()),
        }
    }

    pub fn order_code(&self) -> &str {
        self.parts().1
    }
}

impl fmt::Display for CallbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (verb, code) = self.parts();
        write!(f, "{}:{}", verb, code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCallback(pub String);

impl FromStr for CallbackAction {
    type Err = UnknownCallback;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownCallback(data.to_string());
        let (verb, code) = data.split_once(':').ok_or_else(unknown)?;
        let code = code.trim();
        if code.is_empty() {
            return Err(unknown());
        }
        let code = code.to_string();

        match verb {
            "PAY_BTC" => Ok(CallbackAction::PayBtc(code)),
            "PAY_TC" => Ok(CallbackAction::PayTranscash(code)),
            "SEND_PDF" => Ok(CallbackAction::SendLabel(code)),
            "ADM_PAID" => Ok(CallbackAction::AdminConfirmPaid(code)),
            "ADM_CANCEL" => Ok(CallbackAction::AdminCancel(code)),
            "ADM_DONE" => Ok(CallbackAction::AdminDone(code)),
            _ => Err(unknown()),
        }
    }
}
