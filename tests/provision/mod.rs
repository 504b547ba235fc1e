//! Provisioning run scenarios with scripted fleet, worker and sink doubles.

mod scenarios;
mod test_doubles;
mod test_helpers;
