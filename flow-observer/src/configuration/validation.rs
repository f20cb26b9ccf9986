//! Configuration validation logic

use super::ObserverSettings;
use crate::errors::ObserverError;
use crate::history::MAX_CAPACITY;

impl ObserverSettings {
    pub fn validate(&self) -> Result<(), ObserverError> {
        self.validate_max_flows()
    }

    pub fn validate_max_flows(&self) -> Result<(), ObserverError> {
        if self.max_flows > MAX_CAPACITY {
            return Err(ObserverError::config(format!(
                "max_flows must be at most {}, got {}",
                MAX_CAPACITY, self.max_flows
            )));
        }
        Ok(())
    }
}
