//! Query-string contract between the quote flow and the results page.

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{CarDetails, FormData};
use crate::validation::{PlateFormat, is_valid_email};

pub const PARAM_NAME: &str = "name";
pub const PARAM_EMAIL: &str = "email";
pub const PARAM_LICENSE_PLATE: &str = "licensePlate";
pub const PARAM_CAR_MAKE: &str = "carMake";
pub const PARAM_CAR_MODEL: &str = "carModel";
pub const PARAM_CAR_YEAR: &str = "carYear";
pub const PARAM_FIPE_CODE: &str = "fipeCode";
pub const PARAM_ESTIMATED_VALUE: &str = "estimatedValue";

pub const DEFAULT_ESTIMATED_VALUE: f64 = 50_000.0;
pub const MIN_CAR_YEAR: i32 = 1990;
pub const MIN_ESTIMATED_VALUE: f64 = 1_000.0;

pub const ERR_NAME_REQUIRED: &str = "Nome é obrigatório";
pub const ERR_EMAIL_REQUIRED: &str = "E-mail é obrigatório";
pub const ERR_EMAIL_INVALID: &str = "E-mail inválido";
pub const ERR_PLATE_REQUIRED: &str = "Placa é obrigatória";
pub const ERR_PLATE_INVALID: &str = "Placa inválida";
pub const ERR_CAR_MODEL_REQUIRED: &str = "Modelo do veículo é obrigatório";
pub const ERR_CAR_YEAR_INVALID: &str = "Ano do veículo inválido";
pub const ERR_ESTIMATED_VALUE_INVALID: &str = "Valor estimado do veículo inválido";

pub fn create_results_url(
    base_path: &str,
    form_data: &FormData,
    car_details: Option<&CarDetails>,
) -> String {
    let mut pairs: Vec<(&str, String)> = vec![
        (PARAM_NAME, form_data.name.clone()),
        (PARAM_EMAIL, form_data.email.clone()),
        (PARAM_LICENSE_PLATE, form_data.license_plate.clone()),
    ];
    if let Some(car) = car_details {
        pairs.extend([
            (PARAM_CAR_MAKE, car.make.clone()),
            (PARAM_CAR_MODEL, car.model.clone()),
            (PARAM_CAR_YEAR, car.year.to_string()),
            (PARAM_FIPE_CODE, car.fipe_code.clone()),
            (PARAM_ESTIMATED_VALUE, format!("{:.0}", car.estimated_value)),
        ]);
    }

    let query = pairs
        .iter()
        .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{base_path}?{query}")
}

/// Decoded query parameters; the first occurrence of a key wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParams {
    params: HashMap<String, String>,
}

impl SearchParams {
    /// Parse `a=1&b=2`, with or without a leading `?` or path. `+` decodes to a space.
    pub fn parse(input: &str) -> Self {
        let query = match input.split_once('?') {
            Some((_, query)) => query,
            None => input,
        };
        let mut params = HashMap::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = decode_component(key);
            if !params.contains_key(&key) {
                params.insert(key, decode_component(value));
            }
        }
        Self { params }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Present and not blank.
    fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|v| !v.is_empty())
    }
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsData {
    pub name: String,
    pub email: String,
    pub license_plate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub car_details: Option<CarDetails>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResultsData>,
}

impl ResultsValidation {
    fn invalid(errors: Vec<String>) -> Self {
        Self {
            is_valid: false,
            errors,
            data: None,
        }
    }
}

pub fn validate_results_params(params: &SearchParams) -> ResultsValidation {
    validate_results_params_for_year(params, chrono::Utc::now().year())
}

/// Same as [`validate_results_params`] with an explicit current year.
pub fn validate_results_params_for_year(
    params: &SearchParams,
    current_year: i32,
) -> ResultsValidation {
    let mut errors = Vec::new();

    let name = params.non_empty(PARAM_NAME);
    if name.is_none() {
        errors.push(ERR_NAME_REQUIRED.to_string());
    }

    let email = params.non_empty(PARAM_EMAIL).map(str::to_lowercase);
    match email.as_deref() {
        None => errors.push(ERR_EMAIL_REQUIRED.to_string()),
        Some(email) if !is_valid_email(email) => errors.push(ERR_EMAIL_INVALID.to_string()),
        Some(_) => {}
    }

    let plate = params
        .non_empty(PARAM_LICENSE_PLATE)
        .map(|p| p.replacen('-', "", 1).to_uppercase());
    match plate.as_deref() {
        None => errors.push(ERR_PLATE_REQUIRED.to_string()),
        Some(plate) if PlateFormat::detect(plate).is_none() => {
            errors.push(ERR_PLATE_INVALID.to_string())
        }
        Some(_) => {}
    }

    let car_details = params
        .non_empty(PARAM_CAR_MAKE)
        .map(|make| parse_car_details(params, make, current_year, &mut errors));

    if !errors.is_empty() {
        return ResultsValidation::invalid(errors);
    }

    match (name, email, plate) {
        (Some(name), Some(email), Some(license_plate)) => ResultsValidation {
            is_valid: true,
            errors: Vec::new(),
            data: Some(ResultsData {
                name: name.to_string(),
                email,
                license_plate,
                car_details: car_details.flatten(),
            }),
        },
        _ => ResultsValidation::invalid(vec![ERR_NAME_REQUIRED.to_string()]),
    }
}

fn parse_car_details(
    params: &SearchParams,
    make: &str,
    current_year: i32,
    errors: &mut Vec<String>,
) -> Option<CarDetails> {
    let before = errors.len();

    let model = params.non_empty(PARAM_CAR_MODEL);
    if model.is_none() {
        errors.push(ERR_CAR_MODEL_REQUIRED.to_string());
    }

    let year = params
        .non_empty(PARAM_CAR_YEAR)
        .and_then(|y| y.parse::<i32>().ok())
        .filter(|y| (MIN_CAR_YEAR..=current_year + 1).contains(y));
    if year.is_none() {
        errors.push(ERR_CAR_YEAR_INVALID.to_string());
    }

    let estimated_value = match params.non_empty(PARAM_ESTIMATED_VALUE) {
        None => Some(DEFAULT_ESTIMATED_VALUE),
        Some(raw) => raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= MIN_ESTIMATED_VALUE),
    };
    if estimated_value.is_none() {
        errors.push(ERR_ESTIMATED_VALUE_INVALID.to_string());
    }

    if errors.len() != before {
        return None;
    }

    Some(CarDetails {
        make: make.to_string(),
        model: model?.to_string(),
        year: year?,
        fipe_code: params.non_empty(PARAM_FIPE_CODE).unwrap_or_default().to_string(),
        estimated_value: estimated_value?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joao() -> FormData {
        FormData::new("João Silva", "joao@email.com", "ABC1234")
    }

    fn corolla() -> CarDetails {
        CarDetails {
            make: "Toyota".to_string(),
            model: "Corolla".to_string(),
            year: 2020,
            fipe_code: "038001-1".to_string(),
            estimated_value: 85_000.0,
        }
    }

    #[test]
    fn test_results_url_encodes_all_fields_in_order() {
        let url = create_results_url("/cotacao", &joao(), Some(&corolla()));
        assert_eq!(
            url,
            "/cotacao?name=Jo%C3%A3o%20Silva&email=joao%40email.com&licensePlate=ABC1234\
             &carMake=Toyota&carModel=Corolla&carYear=2020&fipeCode=038001-1&estimatedValue=85000"
        );
    }

    #[test]
    fn test_results_url_without_car() {
        let url = create_results_url("/cotacao", &joao(), None);
        assert!(url.ends_with("licensePlate=ABC1234"));
        assert!(!url.contains(PARAM_CAR_MAKE));
    }

    #[test]
    fn test_create_then_validate() {
        let url = create_results_url("/cotacao", &joao(), Some(&corolla()));
        let result = validate_results_params_for_year(&SearchParams::parse(&url), 2026);

        assert!(result.is_valid, "{:?}", result.errors);
        let data = result.data.unwrap();
        assert_eq!(data.name, "João Silva");
        assert_eq!(data.car_details, Some(corolla()));
    }

    #[test]
    fn test_missing_email_and_plate_reported_in_order() {
        let result = validate_results_params_for_year(&SearchParams::parse("name=Ana"), 2026);
        assert!(!result.is_valid);
        assert_eq!(result.errors, vec![ERR_EMAIL_REQUIRED, ERR_PLATE_REQUIRED]);
        assert!(result.data.is_none());
    }

    #[test]
    fn test_plate_with_single_hyphen_accepted() {
        let params = SearchParams::parse("name=Ana&email=ana%40x.com&licensePlate=abc-1234");
        let result = validate_results_params_for_year(&params, 2026);
        assert!(result.is_valid);
        assert_eq!(result.data.unwrap().license_plate, "ABC1234");

        let params = SearchParams::parse("name=Ana&email=ana%40x.com&licensePlate=AB-C-1234");
        let result = validate_results_params_for_year(&params, 2026);
        assert_eq!(result.errors, vec![ERR_PLATE_INVALID]);
    }

    #[test]
    fn test_car_group_validation() {
        let base = "name=Ana&email=ana@x.com&licensePlate=ABC1D23&carMake=Fiat&carModel=Argo";

        let future = format!("{base}&carYear=2028");
        let result = validate_results_params_for_year(&SearchParams::parse(&future), 2026);
        assert_eq!(result.errors, vec![ERR_CAR_YEAR_INVALID]);

        let cheap = format!("{base}&carYear=2021&estimatedValue=999");
        let result = validate_results_params_for_year(&SearchParams::parse(&cheap), 2026);
        assert_eq!(result.errors, vec![ERR_ESTIMATED_VALUE_INVALID]);

        let defaulted = format!("{base}&carYear=2027");
        let result = validate_results_params_for_year(&SearchParams::parse(&defaulted), 2026);
        let car = result.data.unwrap().car_details.unwrap();
        assert_eq!(car.estimated_value, DEFAULT_ESTIMATED_VALUE);
    }

    #[test]
    fn test_car_fields_ignored_without_make() {
        let params =
            SearchParams::parse("name=Ana&email=ana@x.com&licensePlate=ABC1234&carYear=1800");
        let result = validate_results_params_for_year(&params, 2026);
        assert!(result.is_valid);
        assert!(result.data.unwrap().car_details.is_none());
    }

    #[test]
    fn test_plus_decodes_to_space() {
        let params = SearchParams::parse("?name=Maria+Clara");
        assert_eq!(params.get(PARAM_NAME), Some("Maria Clara"));
    }
}
