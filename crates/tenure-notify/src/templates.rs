//! Alert message templates

use chrono::{DateTime, Utc};
use tenure_api::EntitlementKind;

/// Everything an expiry alert says about its entitlement
#[derive(Debug, Clone)]
pub struct AlertMessage<'a> {
    pub kind: EntitlementKind,
    pub reference: &'a str,
    pub label: &'a str,
    pub threshold_days: u32,
    pub remaining_days: i64,
    pub expires_at: DateTime<Utc>,
}

fn kind_noun(kind: EntitlementKind) -> &'static str {
    match kind {
        EntitlementKind::Certificate => "certificado",
        EntitlementKind::Project => "proyecto",
    }
}

fn days(n: i64) -> String {
    if n == 1 {
        "1 día".to_string()
    } else {
        format!("{} días", n)
    }
}

impl AlertMessage<'_> {
    pub fn subject(&self) -> String {
        format!(
            "Aviso de vencimiento: {} {} ({}) vence en {}",
            kind_noun(self.kind),
            self.reference,
            self.label,
            days(self.remaining_days)
        )
    }

    pub fn body(&self) -> String {
        format!(
            "El {noun} {reference} ({label}) vence el {expires} UTC.\n\
             Días restantes: {remaining}.\n\
             \n\
             Este aviso corresponde al umbral de {threshold} y se envía una sola vez.\n\
             Renueve o actualice la vigencia para evitar la interrupción del servicio.\n",
            noun = kind_noun(self.kind),
            reference = self.reference,
            label = self.label,
            expires = tenure_util::format_datetime_full(&self.expires_at),
            remaining = self.remaining_days,
            threshold = days(self.threshold_days as i64),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn renders_certificate_alert() {
        let message = AlertMessage {
            kind: EntitlementKind::Certificate,
            reference: "C-0042",
            label: "Firma electrónica",
            threshold_days: 30,
            remaining_days: 25,
            expires_at: Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
        };

        assert_eq!(
            message.subject(),
            "Aviso de vencimiento: certificado C-0042 (Firma electrónica) vence en 25 días"
        );
        let body = message.body();
        assert!(body.contains("2025-03-01 00:00:00"));
        assert!(body.contains("umbral de 30 días"));
    }

    #[test]
    fn singular_day() {
        let message = AlertMessage {
            kind: EntitlementKind::Project,
            reference: "P-1",
            label: "Portal",
            threshold_days: 30,
            remaining_days: 1,
            expires_at: Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
        };
        assert!(message.subject().ends_with("vence en 1 día"));
    }
}
