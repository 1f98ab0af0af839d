use metrics::register_coordinator_counter;

register_coordinator_counter!(pub BAD_REQUEST_ERROR_TOTAL, "Count of bad request errors");
register_coordinator_counter!(pub NOT_FOUND_ERROR_TOTAL, "Count of not found errors");
