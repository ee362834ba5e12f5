//! Fixed reference data served by the mock insurance API.

use crate::models::{CarDetails, CoverageDetails, InsuranceOffer};

/// Vehicle value at which offers are priced as listed.
pub const REFERENCE_VEHICLE_VALUE: f64 = 50_000.0;

const KNOWN_VEHICLES: &[(&str, &str, &str, i32, &str, f64)] = &[
    ("ABC1234", "Toyota", "Corolla", 2020, "038001-1", 85_000.0),
    ("XYZ9876", "Honda", "Civic", 2019, "014071-6", 78_000.0),
    ("DEF5678", "Volkswagen", "Gol", 2018, "005340-6", 42_000.0),
    ("GHI9012", "Fiat", "Argo", 2021, "001461-3", 61_000.0),
    ("ABC1D23", "Chevrolet", "Onix", 2022, "004474-8", 72_000.0),
    ("BRA2E19", "Hyundai", "HB20", 2023, "015162-9", 79_000.0),
    ("JKL3M45", "Jeep", "Compass", 2022, "027066-0", 165_000.0),
];

pub fn find_vehicle(normalized_plate: &str) -> Option<CarDetails> {
    KNOWN_VEHICLES
        .iter()
        .find(|(plate, ..)| *plate == normalized_plate)
        .map(|(_, make, model, year, fipe_code, value)| CarDetails {
            make: make.to_string(),
            model: model.to_string(),
            year: *year,
            fipe_code: fipe_code.to_string(),
            estimated_value: *value,
        })
}

/// Record returned for well-formed plates that are not in the catalog.
pub fn fallback_vehicle() -> CarDetails {
    CarDetails {
        make: "Genérico".to_string(),
        model: "Veículo Popular".to_string(),
        year: 2018,
        fipe_code: "000000-0".to_string(),
        estimated_value: REFERENCE_VEHICLE_VALUE,
    }
}

#[allow(clippy::too_many_arguments)]
fn offer(
    id: &str,
    insurer_name: &str,
    monthly_premium: f64,
    savings: f64,
    rating: f64,
    deductible: f64,
    highlights: &[&str],
    coverage_details: CoverageDetails,
) -> InsuranceOffer {
    InsuranceOffer {
        id: id.to_string(),
        insurer_name: insurer_name.to_string(),
        monthly_premium,
        coverage_highlights: highlights.iter().map(|h| h.to_string()).collect(),
        savings,
        rating,
        deductible,
        coverage_details,
    }
}

pub fn base_offers() -> Vec<InsuranceOffer> {
    vec![
        offer(
            "offer-1",
            "Porto Seguro",
            189.90,
            320.0,
            4.8,
            3_500.0,
            &[
                "Cobertura completa",
                "Assistência 24h",
                "Carro reserva por 15 dias",
            ],
            CoverageDetails {
                collision: true,
                theft: true,
                fire: true,
                natural_disasters: true,
                third_party_liability: 100_000.0,
                personal_accident: 50_000.0,
            },
        ),
        offer(
            "offer-2",
            "Allianz",
            169.90,
            280.0,
            4.6,
            4_000.0,
            &["Cobertura completa", "Guincho ilimitado", "Vidros e faróis"],
            CoverageDetails {
                collision: true,
                theft: true,
                fire: true,
                natural_disasters: false,
                third_party_liability: 80_000.0,
                personal_accident: 30_000.0,
            },
        ),
        offer(
            "offer-3",
            "Bradesco Seguros",
            159.90,
            250.0,
            4.5,
            4_200.0,
            &["Roubo e furto", "Assistência 24h", "Desconto para bons motoristas"],
            CoverageDetails {
                collision: true,
                theft: true,
                fire: true,
                natural_disasters: false,
                third_party_liability: 75_000.0,
                personal_accident: 25_000.0,
            },
        ),
        offer(
            "offer-4",
            "SulAmérica",
            149.90,
            210.0,
            4.3,
            4_500.0,
            &["Roubo e furto", "Incêndio", "Carro reserva por 7 dias"],
            CoverageDetails {
                collision: false,
                theft: true,
                fire: true,
                natural_disasters: true,
                third_party_liability: 60_000.0,
                personal_accident: 20_000.0,
            },
        ),
        offer(
            "offer-5",
            "Tokio Marine",
            174.90,
            300.0,
            4.7,
            3_800.0,
            &["Cobertura completa", "Fenômenos naturais", "Martelinho de ouro"],
            CoverageDetails {
                collision: true,
                theft: true,
                fire: true,
                natural_disasters: true,
                third_party_liability: 90_000.0,
                personal_accident: 40_000.0,
            },
        ),
    ]
}

pub fn find_offer(offer_id: &str) -> Option<InsuranceOffer> {
    base_offers().into_iter().find(|o| o.id == offer_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::PlateFormat;

    #[test]
    fn test_catalog_plates_are_well_formed() {
        for (plate, ..) in KNOWN_VEHICLES {
            assert!(PlateFormat::detect(plate).is_some(), "{plate}");
        }
    }

    #[test]
    fn test_offer_ids_are_unique() {
        let offers = base_offers();
        let mut ids: Vec<&str> = offers.iter().map(|o| o.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), offers.len());
        assert!(offers.iter().all(|o| (0.0..=5.0).contains(&o.rating)));
    }
}
