use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::Config;
use crate::engine::BookingError;
use crate::limits::MAX_PRICE_PER_NIGHT;
use crate::model::*;
use crate::payment::{format_amount, parse_amount};

use super::{CreateReservation, ReservationSink, ReservationSource, PAID_BOOKING_STATUS};

// ── Wire types ───────────────────────────────────────────────────

/// Decimal amounts arrive as JSON numbers or strings depending on the
/// backend's serializer.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Amount {
    Text(String),
    Number(f64),
}

impl Amount {
    fn to_cents(&self) -> Option<Cents> {
        match self {
            Amount::Text(s) => parse_amount(s),
            Amount::Number(n) if n.is_finite() && n.abs() < 1e15 => Some((n * 100.0).round() as Cents),
            Amount::Number(_) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RoomDto {
    id: RoomId,
    room_number: String,
    #[serde(rename = "type")]
    kind: String,
    price_per_night: Amount,
    capacity: u32,
    #[serde(default)]
    status: Option<String>,
}

impl TryFrom<RoomDto> for RoomInfo {
    type Error = BookingError;

    fn try_from(dto: RoomDto) -> Result<Self, Self::Error> {
        let price_per_night = dto
            .price_per_night
            .to_cents()
            .filter(|cents| (1..=MAX_PRICE_PER_NIGHT).contains(cents))
            .ok_or_else(|| BookingError::InvalidSnapshot(format!("room {}: bad price", dto.id)))?;
        Ok(RoomInfo {
            id: dto.id,
            number: dto.room_number,
            kind: dto.kind.parse()?,
            capacity: dto.capacity,
            price_per_night,
            status: dto.status.as_deref().unwrap_or("Available").parse()?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ReservationDto {
    id: ReservationId,
    room_id: RoomId,
    check_in_date: String,
    check_out_date: String,
    status: String,
}

fn wire_date(raw: &str, id: ReservationId) -> Result<CalendarDate, BookingError> {
    parse_calendar_date(raw)
        .ok_or_else(|| BookingError::InvalidSnapshot(format!("reservation {id}: bad date {raw:?}")))
}

impl TryFrom<ReservationDto> for CommittedReservation {
    type Error = BookingError;

    fn try_from(dto: ReservationDto) -> Result<Self, Self::Error> {
        let start = wire_date(&dto.check_in_date, dto.id)?;
        let end = wire_date(&dto.check_out_date, dto.id)?;
        let range = DateRange::new(start, end)
            .map_err(|e| BookingError::InvalidSnapshot(format!("reservation {}: {e}", dto.id)))?;
        Ok(CommittedReservation {
            id: dto.id,
            room_id: dto.room_id,
            range,
            status: dto.status.parse()?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct BlockedDatesDto {
    blocked_dates: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorDto {
    detail: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct CreateReservationBody<'a> {
    guest_id: GuestId,
    room_id: RoomId,
    check_in_date: String,
    check_out_date: String,
    guests_count: u32,
    special_requests: Option<&'a str>,
    status: &'static str,
    total_price: String,
    payment_method: &'a str,
    payment_status: &'static str,
    payment_reference: &'a str,
}

impl<'a> From<&'a CreateReservation> for CreateReservationBody<'a> {
    fn from(req: &'a CreateReservation) -> Self {
        Self {
            guest_id: req.guest_id,
            room_id: req.room_id,
            check_in_date: req.range.start().to_string(),
            check_out_date: req.range.end().to_string(),
            guests_count: req.guests,
            special_requests: req.special_requests.as_deref(),
            status: PAID_BOOKING_STATUS.as_str(),
            total_price: format_amount(req.total),
            payment_method: &req.receipt.provider,
            payment_status: "Paid",
            payment_reference: &req.receipt.reference,
        }
    }
}

// ── Client ───────────────────────────────────────────────────────

/// JSON client for the hotel's reservation backend.
#[derive(Clone)]
pub struct RestBackend {
    http: Client,
    url: String,
    token: Option<String>,
}

impl RestBackend {
    pub fn new(url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self, BookingError> {
        let http = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| BookingError::NetworkError(e.to_string()))?;
        let url = url.into().trim_end_matches('/').to_string();
        Ok(Self { http, url, token })
    }

    pub fn from_config(config: &Config) -> Result<Self, BookingError> {
        Self::new(config.api_url.clone(), config.api_token.clone(), config.http_timeout)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, BookingError> {
        self.authorized(builder)
            .send()
            .await
            .map_err(|e| BookingError::NetworkError(e.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, BookingError> {
        let url = format!("{}{path}", self.url);
        let resp = self.send(self.http.get(&url)).await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(BookingError::NotFound(error_detail(resp).await.unwrap_or(url)));
        }
        if !status.is_success() {
            let detail = error_detail(resp).await.unwrap_or_default();
            return Err(BookingError::NetworkError(format!("{status} from {path}: {detail}")));
        }
        resp.json()
            .await
            .map_err(|e| BookingError::InvalidSnapshot(format!("{path}: {e}")))
    }
}

/// FastAPI-style `{"detail": ...}` body, if there is one.
async fn error_detail(resp: Response) -> Option<String> {
    let body: ErrorDto = resp.json().await.ok()?;
    Some(match body.detail {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

#[async_trait]
impl ReservationSource for RestBackend {
    #[instrument(skip(self), level = "debug")]
    async fn room(&self, room_id: RoomId) -> Result<RoomInfo, BookingError> {
        let dto: RoomDto = self.get_json(&format!("/rooms/{room_id}")).await?;
        dto.try_into()
    }

    #[instrument(skip(self), level = "debug")]
    async fn reservations(&self, room_id: RoomId) -> Result<Vec<CommittedReservation>, BookingError> {
        let dtos: Vec<ReservationDto> = self.get_json(&format!("/reservations/room/{room_id}")).await?;
        let reservations = dtos
            .into_iter()
            .map(CommittedReservation::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(count = reservations.len(), "reservation snapshot fetched");
        Ok(reservations)
    }

    #[instrument(skip(self), level = "debug")]
    async fn blocked_dates(&self, room_id: RoomId) -> Result<Vec<CalendarDate>, BookingError> {
        let dto: BlockedDatesDto = self
            .get_json(&format!("/reservations/room/{room_id}/blocked-dates"))
            .await?;
        dto.blocked_dates
            .iter()
            .map(|raw| {
                parse_calendar_date(raw)
                    .ok_or_else(|| BookingError::InvalidSnapshot(format!("bad blocked date {raw:?}")))
            })
            .collect()
    }
}

#[async_trait]
impl ReservationSink for RestBackend {
    #[instrument(skip(self, request), fields(room_id = request.room_id, range = %request.range), level = "debug")]
    async fn create(&self, request: &CreateReservation) -> Result<CommittedReservation, BookingError> {
        let url = format!("{}/reservations/", self.url);
        let body = CreateReservationBody::from(request);
        let resp = self.send(self.http.post(&url).json(&body)).await?;
        let status = resp.status();
        if !status.is_success() {
            let detail = error_detail(resp)
                .await
                .unwrap_or_else(|| format!("backend answered {status}"));
            return Err(BookingError::PersistenceConflict { detail, ticket: None });
        }
        let dto: ReservationDto = resp
            .json()
            .await
            .map_err(|e| BookingError::InvalidSnapshot(format!("created reservation: {e}")))?;
        dto.try_into()
    }

    #[instrument(skip(self), level = "debug")]
    async fn send_confirmation(&self, reservation_id: ReservationId) -> Result<(), BookingError> {
        let url = format!("{}/reservations/{reservation_id}/send-confirmation", self.url);
        let resp = self.send(self.http.post(&url)).await?;
        let status = resp.status();
        if !status.is_success() {
            let detail = error_detail(resp).await.unwrap_or_default();
            return Err(BookingError::NetworkError(format!("{status}: {detail}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_dto_accepts_string_and_number_prices() {
        let text: RoomDto = serde_json::from_str(
            r#"{"id":1,"room_number":"101","type":"Suite","price_per_night":"120.50","capacity":2,"status":"maintenance"}"#,
        )
        .unwrap();
        let room = RoomInfo::try_from(text).unwrap();
        assert_eq!(room.price_per_night, 12_050);
        assert_eq!(room.kind, RoomKind::Suite);
        assert_eq!(room.status, RoomStatus::Maintenance);

        let number: RoomDto = serde_json::from_str(
            r#"{"id":2,"room_number":"102","type":"Double","price_per_night":89.99,"capacity":2}"#,
        )
        .unwrap();
        let room = RoomInfo::try_from(number).unwrap();
        assert_eq!(room.price_per_night, 8_999);
        assert_eq!(room.status, RoomStatus::Available);
    }

    #[test]
    fn room_dto_rejects_out_of_range_prices() {
        for price in [r#""0.00""#, r#""-45.00""#, "-1", "1e300", r#""99999999999.00""#] {
            let json = format!(
                r#"{{"id":3,"room_number":"103","type":"Single","price_per_night":{price},"capacity":1}}"#
            );
            let dto: RoomDto = serde_json::from_str(&json).unwrap();
            assert!(
                matches!(RoomInfo::try_from(dto), Err(BookingError::InvalidSnapshot(_))),
                "price {price} accepted"
            );
        }
    }

    #[test]
    fn reservation_dto_keeps_only_the_date() {
        let dto: ReservationDto = serde_json::from_str(
            r#"{"id":5,"room_id":1,"check_in_date":"2024-06-01T14:00:00","check_out_date":"2024-06-05T11:00:00+02:00","status":"Confirmed","total_price":"480.00"}"#,
        )
        .unwrap();
        let r = CommittedReservation::try_from(dto).unwrap();
        assert_eq!(r.range.start(), parse_calendar_date("2024-06-01").unwrap());
        assert_eq!(r.range.end(), parse_calendar_date("2024-06-05").unwrap());
        assert_eq!(r.status, ReservationStatus::Confirmed);
    }

    #[test]
    fn unknown_status_is_invalid_snapshot() {
        let dto: ReservationDto = serde_json::from_str(
            r#"{"id":6,"room_id":1,"check_in_date":"2024-06-01","check_out_date":"2024-06-02","status":"OnHold"}"#,
        )
        .unwrap();
        assert!(matches!(
            CommittedReservation::try_from(dto),
            Err(BookingError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn inverted_backend_range_is_invalid_snapshot() {
        let dto: ReservationDto = serde_json::from_str(
            r#"{"id":7,"room_id":1,"check_in_date":"2024-06-03","check_out_date":"2024-06-03","status":"Pending"}"#,
        )
        .unwrap();
        assert!(matches!(
            CommittedReservation::try_from(dto),
            Err(BookingError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn create_body_shape() {
        let request = CreateReservation {
            room_id: 3,
            guest_id: 8,
            range: DateRange::new(
                parse_calendar_date("2024-06-05").unwrap(),
                parse_calendar_date("2024-06-10").unwrap(),
            )
            .unwrap(),
            guests: 2,
            special_requests: Some("late arrival".into()),
            total: 60_000,
            receipt: crate::payment::PaymentReceipt {
                provider: "PayPal".into(),
                reference: "8AB123".into(),
                payer: None,
                amount: 60_000,
                currency: "USD".into(),
            },
        };
        let json = serde_json::to_value(CreateReservationBody::from(&request)).unwrap();
        assert_eq!(json["check_in_date"], "2024-06-05");
        assert_eq!(json["check_out_date"], "2024-06-10");
        assert_eq!(json["total_price"], "600.00");
        assert_eq!(json["status"], "Active");
        assert_eq!(json["payment_method"], "PayPal");
        assert_eq!(json["payment_status"], "Paid");
        assert_eq!(json["guests_count"], 2);
    }
}
