use serde::{Deserialize, Serialize};

/// Raw or normalized user input from the initial quote form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FormData {
    pub name: String,
    pub email: String,
    pub license_plate: String,
}

impl FormData {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        license_plate: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            license_plate: license_plate.into(),
        }
    }
}

/// Vehicle record returned by the plate lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarDetails {
    pub make: String,
    pub model: String,
    pub year: i32,
    pub fipe_code: String,
    pub estimated_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageDetails {
    pub collision: bool,
    pub theft: bool,
    pub fire: bool,
    pub natural_disasters: bool,
    pub third_party_liability: f64,
    pub personal_accident: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsuranceOffer {
    pub id: String,
    pub insurer_name: String,
    pub monthly_premium: f64,
    pub coverage_highlights: Vec<String>,
    pub savings: f64,
    /// 0.0 to 5.0
    pub rating: f64,
    pub deductible: f64,
    pub coverage_details: CoverageDetails,
}

/// Outcome of the quote-generation mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResult {
    pub form_data: FormData,
    pub car_details: CarDetails,
    pub offers: Vec<InsuranceOffer>,
}
