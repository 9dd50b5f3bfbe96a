//! Claim vouchers as issued by the backend and as submitted to the distributor contract.
#![forbid(unsafe_code)]

use serde::{de, Deserialize, Deserializer, Serialize};

/// A signed, time-boxed authorization to transfer `amount` base units to `to`.
///
/// All numeric fields are kept as decimal strings: amounts are 18-decimal token base units and
/// overflow every native integer type before they overflow a `uint256`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimVoucher {
    pub to: String,
    pub amount: String,
    pub nonce: String,
    /// Unix timestamp (seconds) after which the contract refuses the voucher.
    pub deadline: String,
}

impl ClaimVoucher {
    /// Contract call arguments, in the order the distributor expects them.
    pub fn submission_args(&self) -> VoucherArgs {
        VoucherArgs([
            self.to.clone(),
            self.amount.clone(),
            self.nonce.clone(),
            self.deadline.clone(),
        ])
    }
}

/// Encoded `[to, amount, nonce, deadline]` tuple handed to the wallet signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct VoucherArgs(pub [String; 4]);

impl VoucherArgs {
    pub fn to(&self) -> &str {
        &self.0[0]
    }

    pub fn amount(&self) -> &str {
        &self.0[1]
    }

    pub fn nonce(&self) -> &str {
        &self.0[2]
    }

    pub fn deadline(&self) -> &str {
        &self.0[3]
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

/// Voucher request response exactly as it came off the wire.
///
/// Nothing here is trusted yet; [`IssuedVoucher::validate`] turns it into a [`VoucherGrant`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedVoucher {
    #[serde(default)]
    pub voucher: Option<RawVoucher>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(
        default,
        rename = "claimedAmount",
        alias = "claimed_amount",
        deserialize_with = "de_decimal_opt"
    )]
    pub claimed_amount: Option<String>,
}

/// Voucher fields with every member optional, so a partial body still deserializes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawVoucher {
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default, deserialize_with = "de_decimal_opt")]
    pub amount: Option<String>,
    #[serde(default, deserialize_with = "de_decimal_opt")]
    pub nonce: Option<String>,
    #[serde(default, deserialize_with = "de_decimal_opt")]
    pub deadline: Option<String>,
}

/// A structurally valid voucher plus the backend's signature over it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoucherGrant {
    pub voucher: ClaimVoucher,
    pub signature: String,
    /// Amount the backend reports as claimed (defaults to the voucher amount).
    pub claimed_amount: String,
}

impl IssuedVoucher {
    /// Nonce of the issued voucher, if the backend sent one.
    pub fn nonce(&self) -> Option<&str> {
        self.voucher
            .as_ref()
            .and_then(|v| v.nonce.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Checks that all four voucher fields and the signature are present and well formed.
    ///
    /// The error string names the first offending field.
    pub fn validate(self) -> Result<VoucherGrant, String> {
        let raw = self.voucher.ok_or_else(|| "missing voucher".to_string())?;

        let to = required(raw.to, "to")?;
        let amount = required(raw.amount, "amount")?;
        let nonce = required(raw.nonce, "nonce")?;
        let deadline = required(raw.deadline, "deadline")?;
        for (name, value) in [("amount", &amount), ("nonce", &nonce), ("deadline", &deadline)] {
            if !is_decimal(value) {
                return Err(format!("voucher.{name} is not a decimal integer: {value}"));
            }
        }

        let signature = self
            .signature
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "missing signature".to_string())?;

        let claimed_amount = self
            .claimed_amount
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| amount.clone());

        Ok(VoucherGrant {
            voucher: ClaimVoucher {
                to,
                amount,
                nonce,
                deadline,
            },
            signature,
            claimed_amount,
        })
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("missing voucher.{field}"))
}

fn is_decimal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Accepts a JSON string or integer and normalizes it to a decimal string.
fn de_decimal_opt<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(de::Error::custom(format!(
            "expected string or integer, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issued(json: serde_json::Value) -> IssuedVoucher {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn submission_args_keep_contract_order() {
        let voucher = ClaimVoucher {
            to: "0xabc".to_string(),
            amount: "500000000000000000".to_string(),
            nonce: "7".to_string(),
            deadline: "1999999999".to_string(),
        };
        let args = voucher.submission_args();
        assert_eq!(
            args.as_slice(),
            ["0xabc", "500000000000000000", "7", "1999999999"]
        );
        assert_eq!(
            serde_json::to_value(&args).unwrap(),
            serde_json::json!(["0xabc", "500000000000000000", "7", "1999999999"])
        );
    }

    #[test]
    fn numeric_fields_accept_json_integers() {
        let grant = issued(serde_json::json!({
            "voucher": { "to": "0xabc", "amount": 1000, "nonce": 7, "deadline": 1999999999 },
            "signature": "0xsig",
            "claimedAmount": 1000
        }))
        .validate()
        .unwrap();

        assert_eq!(grant.voucher.nonce, "7");
        assert_eq!(grant.voucher.deadline, "1999999999");
        assert_eq!(grant.claimed_amount, "1000");
    }

    #[test]
    fn claimed_amount_defaults_to_voucher_amount() {
        let grant = issued(serde_json::json!({
            "voucher": { "to": "0xabc", "amount": "42", "nonce": "1", "deadline": "10" },
            "signature": "0xsig"
        }))
        .validate()
        .unwrap();
        assert_eq!(grant.claimed_amount, "42");
    }

    #[test]
    fn each_missing_field_is_named() {
        let full = serde_json::json!({ "to": "0xabc", "amount": "1", "nonce": "2", "deadline": "3" });
        for field in ["to", "amount", "nonce", "deadline"] {
            let mut voucher = full.clone();
            voucher.as_object_mut().unwrap().remove(field);
            let err = issued(serde_json::json!({ "voucher": voucher, "signature": "0xsig" }))
                .validate()
                .unwrap_err();
            assert_eq!(err, format!("missing voucher.{field}"));
        }
    }

    #[test]
    fn blank_or_non_decimal_fields_are_rejected() {
        let err = issued(serde_json::json!({
            "voucher": { "to": "  ", "amount": "1", "nonce": "2", "deadline": "3" },
            "signature": "0xsig"
        }))
        .validate()
        .unwrap_err();
        assert_eq!(err, "missing voucher.to");

        let err = issued(serde_json::json!({
            "voucher": { "to": "0xabc", "amount": "1.5", "nonce": "2", "deadline": "3" },
            "signature": "0xsig"
        }))
        .validate()
        .unwrap_err();
        assert!(err.starts_with("voucher.amount"));
    }

    #[test]
    fn missing_voucher_or_signature_is_rejected() {
        assert_eq!(
            issued(serde_json::json!({ "signature": "0xsig" }))
                .validate()
                .unwrap_err(),
            "missing voucher"
        );
        assert_eq!(
            issued(serde_json::json!({
                "voucher": { "to": "0xabc", "amount": "1", "nonce": "2", "deadline": "3" }
            }))
            .validate()
            .unwrap_err(),
            "missing signature"
        );
    }
}
